//! Annotations stored inside the document file itself
//!
//! The embedded layer has no stable identifiers. Objects are addressed by
//! page and geometry, and changes only reach disk through `save_as`.

use crate::annotation::HighlightColor;
use crate::error::StoreError;
use crate::geometry::{Point, Rect};
use std::path::Path;

/// Highlight object found in the document
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedHighlight {
    pub rects: Vec<Rect>,
    pub text: Option<String>,
    pub color: HighlightColor,
}

/// Text note object found in the document
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedNote {
    pub anchor: Point,
    pub content: Option<String>,
}

/// Native annotation to write into the document
#[derive(Debug, Clone, PartialEq)]
pub enum NativeAnnotation {
    Highlight {
        rects: Vec<Rect>,
        color: HighlightColor,
    },
    Note {
        anchor: Point,
        content: String,
    },
}

pub trait EmbeddedDocument {
    fn list_highlights(&self, page: usize) -> Result<Vec<EmbeddedHighlight>, StoreError>;

    fn list_notes(&self, page: usize) -> Result<Vec<EmbeddedNote>, StoreError>;

    fn add_annotation(&mut self, page: usize, annotation: &NativeAnnotation)
        -> Result<(), StoreError>;

    /// Delete the object whose bounds intersect `geometry`
    fn delete_annotation(&mut self, page: usize, geometry: &Rect) -> Result<(), StoreError>;

    fn set_color(
        &mut self,
        page: usize,
        geometry: &Rect,
        color: HighlightColor,
    ) -> Result<(), StoreError>;

    fn update_note_content(
        &mut self,
        page: usize,
        x: f64,
        y: f64,
        content: &str,
    ) -> Result<(), StoreError>;

    fn save_as(&mut self, path: &Path) -> Result<(), StoreError>;
}

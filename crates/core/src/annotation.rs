//! Annotation data model
//!
//! Highlights and notes share one record type. Every annotation carries the
//! origin that owns its canonical state; the origin is fixed at creation and
//! decides which store a later mutation goes to.

use crate::geometry::{Point, Rect};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an annotation (UUID v4 string)
pub type AnnotationId = String;

/// Highlight palette. Cycling wraps after `Red`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HighlightColor {
    #[default]
    Yellow = 0,
    Green = 1,
    Blue = 2,
    Red = 3,
}

impl HighlightColor {
    pub const COUNT: u8 = 4;

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Color for any index, wrapping modulo 4
    pub fn from_index(index: u8) -> Self {
        match index % Self::COUNT {
            0 => HighlightColor::Yellow,
            1 => HighlightColor::Green,
            2 => HighlightColor::Blue,
            _ => HighlightColor::Red,
        }
    }

    /// `(index + 1) mod 4`
    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    pub fn name(self) -> &'static str {
        match self {
            HighlightColor::Yellow => "Yellow",
            HighlightColor::Green => "Green",
            HighlightColor::Blue => "Blue",
            HighlightColor::Red => "Red",
        }
    }
}

impl fmt::Display for HighlightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which store owns an annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// External persistent store keyed by file path
    Database,
    /// Native object inside the document file
    Embedded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight {
        rects: Vec<Rect>,
        text: Option<String>,
    },
    Note {
        anchor: Point,
        content: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    id: AnnotationId,
    page: usize,
    kind: AnnotationKind,
    color: HighlightColor,
    created_at: DateTime<Utc>,
    origin: Origin,
}

impl Annotation {
    fn new(page: usize, kind: AnnotationKind, origin: Origin) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            page,
            kind,
            color: HighlightColor::default(),
            created_at: Utc::now(),
            origin,
        }
    }

    pub fn highlight(page: usize, rects: Vec<Rect>, text: Option<String>, origin: Origin) -> Self {
        Self::new(page, AnnotationKind::Highlight { rects, text }, origin)
    }

    pub fn note(page: usize, anchor: Point, content: Option<String>, origin: Origin) -> Self {
        Self::new(page, AnnotationKind::Note { anchor, content }, origin)
    }

    pub fn with_color(mut self, color: HighlightColor) -> Self {
        self.color = color;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_id(mut self, id: impl Into<AnnotationId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn kind(&self) -> &AnnotationKind {
        &self.kind
    }

    pub fn color(&self) -> HighlightColor {
        self.color
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_highlight(&self) -> bool {
        matches!(self.kind, AnnotationKind::Highlight { .. })
    }

    pub fn is_note(&self) -> bool {
        matches!(self.kind, AnnotationKind::Note { .. })
    }

    /// Highlighted text or note content
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            AnnotationKind::Highlight { text, .. } => text.as_deref(),
            AnnotationKind::Note { content, .. } => content.as_deref(),
        }
    }

    /// Bounding box used to address the embedded object
    ///
    /// Notes are addressed by the 1x1 box anchored at their point.
    pub fn locator(&self) -> Rect {
        match &self.kind {
            AnnotationKind::Highlight { rects, .. } => {
                Rect::union_all(rects).unwrap_or_default()
            }
            AnnotationKind::Note { anchor, .. } => Rect::unit_at(*anchor),
        }
    }

    pub(crate) fn set_color(&mut self, color: HighlightColor) {
        self.color = color;
    }

    pub(crate) fn set_note_content(&mut self, new_content: Option<String>) -> bool {
        match &mut self.kind {
            AnnotationKind::Note { content, .. } => {
                *content = new_content;
                true
            }
            AnnotationKind::Highlight { .. } => false,
        }
    }
}

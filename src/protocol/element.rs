//! Accessibility value types shared by parameters and payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Control patterns an element may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pattern {
    Invoke,
    Value,
    Toggle,
    ExpandCollapse,
    SelectionItem,
    Selection,
    Scroll,
    ScrollItem,
    RangeValue,
    Window,
    Transform,
    Text,
}

impl Pattern {
    /// Pattern name as reported in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::Invoke => "Invoke",
            Pattern::Value => "Value",
            Pattern::Toggle => "Toggle",
            Pattern::ExpandCollapse => "ExpandCollapse",
            Pattern::SelectionItem => "SelectionItem",
            Pattern::Selection => "Selection",
            Pattern::Scroll => "Scroll",
            Pattern::ScrollItem => "ScrollItem",
            Pattern::RangeValue => "RangeValue",
            Pattern::Window => "Window",
            Pattern::Transform => "Transform",
            Pattern::Text => "Text",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a toggle control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToggleState {
    #[default]
    Off,
    On,
    Indeterminate,
}

impl ToggleState {
    /// The state reached by one toggle action (Off -> On -> Indeterminate -> Off
    /// for three-state controls, Off <-> On otherwise).
    pub fn next(self, three_state: bool) -> Self {
        match (self, three_state) {
            (ToggleState::Off, _) => ToggleState::On,
            (ToggleState::On, true) => ToggleState::Indeterminate,
            (ToggleState::On, false) => ToggleState::Off,
            (ToggleState::Indeterminate, _) => ToggleState::Off,
        }
    }
}

/// State of an expand/collapse control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpandCollapseState {
    #[default]
    Collapsed,
    Expanded,
    PartiallyExpanded,
    LeafNode,
}

/// Scroll step along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScrollAmount {
    LargeDecrement,
    SmallDecrement,
    #[default]
    NoAmount,
    LargeIncrement,
    SmallIncrement,
}

impl ScrollAmount {
    /// Percentage delta applied by this step.
    pub fn delta_percent(self) -> f64 {
        match self {
            ScrollAmount::LargeDecrement => -10.0,
            ScrollAmount::SmallDecrement => -1.0,
            ScrollAmount::NoAmount => 0.0,
            ScrollAmount::LargeIncrement => 10.0,
            ScrollAmount::SmallIncrement => 1.0,
        }
    }
}

/// Visual state of a top-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WindowVisualState {
    #[default]
    Normal,
    Maximized,
    Minimized,
}

/// Screen rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Serializable snapshot of one accessibility element.
///
/// Returned by element queries; nested inside result payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    /// Worker-scoped element id used as `elementId` in requests.
    pub element_id: String,
    /// Accessible name.
    pub name: String,
    /// Control type (e.g. "Button", "Edit").
    pub control_type: String,
    /// Automation id assigned by the application, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_id: Option<String>,
    /// Whether the element accepts input.
    pub is_enabled: bool,
    /// Whether the element currently has keyboard focus.
    pub has_focus: bool,
    /// Screen bounds.
    pub bounding_rectangle: BoundingRect,
    /// Supported patterns.
    pub patterns: Vec<Pattern>,
    /// Ids of direct children.
    #[serde(default)]
    pub children: Vec<String>,
}

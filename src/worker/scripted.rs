//! In-memory desktop backend driven by a JSON fixture.
//!
//! Elements declare the patterns they support and their initial state.
//! An element may also carry a scripted `behavior` that fires on any
//! operation targeting it:
//!
//! ```json
//! {
//!   "elements": [
//!     { "id": "btn1", "name": "OK", "controlType": "Button", "patterns": ["Invoke"] },
//!     { "id": "frozen", "controlType": "Button", "patterns": ["Invoke"], "behavior": "hang" },
//!     { "id": "slow", "controlType": "Button", "patterns": ["Invoke"], "delayMs": 1500 }
//!   ]
//! }
//! ```
//!
//! `crash` exits the hosting process, so it is only meaningful inside the
//! worker binary.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use super::capability::NativeCapability;
use super::error::{CapabilityFault, WorkerError, WorkerResult};
use super::WORKER_TARGET;
use crate::protocol::operations::FindElementsParams;
use crate::protocol::{
    BoundingRect, ElementSnapshot, ExpandCollapseState, OperationCall, Pattern, ToggleState,
    WindowVisualState,
};

/// Exit code used by the `crash` behavior.
pub const CRASH_EXIT_CODE: i32 = 70;

/// Scripted misbehavior of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    /// Never return.
    Hang,
    /// Exit the process.
    Crash,
    /// Panic inside the handler.
    Panic,
    /// Report a native failure.
    Fail,
}

/// Value range of a `RangeValue` element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeState {
    pub value: f64,
    pub minimum: f64,
    pub maximum: f64,
}

impl Default for RangeState {
    fn default() -> Self {
        Self {
            value: 0.0,
            minimum: 0.0,
            maximum: 100.0,
        }
    }
}

/// Scroll position of a `Scroll` element, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrollState {
    pub horizontal_percent: f64,
    pub vertical_percent: f64,
    pub horizontally_scrollable: bool,
    pub vertically_scrollable: bool,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            horizontal_percent: 0.0,
            vertical_percent: 0.0,
            horizontally_scrollable: false,
            vertically_scrollable: true,
        }
    }
}

/// Root of a desktop fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesktopFixture {
    #[serde(default)]
    pub elements: Vec<FixtureElement>,
}

/// One element in a desktop fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureElement {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_control_type")]
    pub control_type: String,
    #[serde(default)]
    pub automation_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub read_only: bool,
    /// Text content; falls back to `name` when absent.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub toggle_state: ToggleState,
    #[serde(default)]
    pub three_state: bool,
    #[serde(default)]
    pub expand_state: ExpandCollapseState,
    #[serde(default)]
    pub selected: bool,
    /// For `Selection` containers.
    #[serde(default)]
    pub multiple_selection: bool,
    #[serde(default)]
    pub range: Option<RangeState>,
    #[serde(default)]
    pub scroll: ScrollState,
    #[serde(default)]
    pub window_state: WindowVisualState,
    #[serde(default)]
    pub bounds: BoundingRect,
    #[serde(default)]
    pub behavior: Option<Behavior>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub children: Vec<FixtureElement>,
}

fn default_control_type() -> String {
    "Custom".to_string()
}

fn default_enabled() -> bool {
    true
}

impl FixtureElement {
    pub fn new(id: &str, name: &str, control_type: &str, patterns: &[Pattern]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            control_type: control_type.to_string(),
            automation_id: None,
            is_enabled: true,
            patterns: patterns.to_vec(),
            value: String::new(),
            read_only: false,
            text: None,
            toggle_state: ToggleState::Off,
            three_state: false,
            expand_state: ExpandCollapseState::Collapsed,
            selected: false,
            multiple_selection: false,
            range: None,
            scroll: ScrollState::default(),
            window_state: WindowVisualState::Normal,
            bounds: BoundingRect::default(),
            behavior: None,
            delay_ms: None,
            children: Vec::new(),
        }
    }

    fn with_children(mut self, children: Vec<FixtureElement>) -> Self {
        self.children = children;
        self
    }
}

struct Node {
    element: FixtureElement,
    parent: Option<String>,
    children: Vec<String>,
    has_focus: bool,
}

#[derive(Default)]
struct DesktopState {
    nodes: BTreeMap<String, Node>,
    /// Element ids in document order.
    order: Vec<String>,
}

/// A scripted accessibility backend.
pub struct ScriptedDesktop {
    state: Mutex<DesktopState>,
}

impl ScriptedDesktop {
    /// Build a desktop from a parsed fixture. Element ids must be unique.
    pub fn from_fixture(fixture: DesktopFixture) -> WorkerResult<Self> {
        let mut state = DesktopState::default();
        for element in fixture.elements {
            state.insert(element, None)?;
        }
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Parse a fixture from JSON text.
    pub fn from_json(json: &str) -> WorkerResult<Self> {
        let fixture: DesktopFixture =
            serde_json::from_str(json).map_err(|err| WorkerError::Fixture(err.to_string()))?;
        Self::from_fixture(fixture)
    }

    /// Load a fixture file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> WorkerResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|err| WorkerError::Fixture(format!("{}: {err}", path.display())))?;
        Self::from_json(&json)
    }

    /// The built-in demo desktop: one window with a handful of controls.
    pub fn demo() -> Self {
        let mut ok = FixtureElement::new("btn1", "OK", "Button", &[Pattern::Invoke]);
        ok.automation_id = Some("okButton".to_string());

        let mut disabled = FixtureElement::new("btn2", "Apply", "Button", &[Pattern::Invoke]);
        disabled.is_enabled = false;

        let name_box = FixtureElement::new("txt1", "Name", "Edit", &[Pattern::Value, Pattern::Text]);

        let remember = FixtureElement::new("chk1", "Remember me", "CheckBox", &[Pattern::Toggle]);

        let settings = FixtureElement::new("tree1", "Settings", "TreeItem", &[Pattern::ExpandCollapse]);

        let mut colors = FixtureElement::new(
            "list1",
            "Colors",
            "List",
            &[Pattern::Selection, Pattern::Scroll],
        );
        colors.children = ["Red", "Green", "Blue"]
            .iter()
            .map(|color| {
                FixtureElement::new(
                    &format!("item-{}", color.to_lowercase()),
                    color,
                    "ListItem",
                    &[Pattern::SelectionItem, Pattern::ScrollItem],
                )
            })
            .collect();

        let mut volume = FixtureElement::new("slider1", "Volume", "Slider", &[Pattern::RangeValue]);
        volume.range = Some(RangeState {
            value: 50.0,
            ..RangeState::default()
        });

        let mut status = FixtureElement::new("lbl1", "Status", "Text", &[Pattern::Text]);
        status.text = Some("Ready".to_string());

        let mut window = FixtureElement::new(
            "main",
            "Warden Demo",
            "Window",
            &[Pattern::Window, Pattern::Transform],
        )
        .with_children(vec![
            ok, disabled, name_box, remember, settings, colors, volume, status,
        ]);
        window.bounds = BoundingRect {
            x: 100.0,
            y: 100.0,
            width: 800.0,
            height: 600.0,
        };

        let mut state = DesktopState::default();
        state.insert_unchecked(window, None);
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DesktopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scripted(&self, element_id: &str) -> (Option<Behavior>, Option<u64>) {
        self.lock()
            .nodes
            .get(element_id)
            .map(|node| (node.element.behavior, node.element.delay_ms))
            .unwrap_or((None, None))
    }
}

impl NativeCapability for ScriptedDesktop {
    fn invoke(&self, call: &OperationCall) -> Result<Value, CapabilityFault> {
        if let Some(element_id) = call.element_id() {
            let (behavior, delay_ms) = self.scripted(element_id);
            if let Some(ms) = delay_ms {
                thread::sleep(Duration::from_millis(ms));
            }
            match behavior {
                Some(Behavior::Hang) => loop {
                    thread::park();
                },
                Some(Behavior::Crash) => {
                    error!(
                        target: WORKER_TARGET,
                        element_id,
                        "scripted crash, exiting"
                    );
                    std::process::exit(CRASH_EXIT_CODE);
                }
                Some(Behavior::Panic) => panic!("scripted panic in element '{element_id}'"),
                Some(Behavior::Fail) => {
                    return Err(CapabilityFault::Failed(format!(
                        "scripted failure in element '{element_id}'"
                    )));
                }
                None => {}
            }
        }

        self.lock().apply(call)
    }
}

impl DesktopState {
    fn insert(&mut self, element: FixtureElement, parent: Option<&str>) -> WorkerResult<()> {
        if self.nodes.contains_key(&element.id) {
            return Err(WorkerError::Fixture(format!(
                "duplicate element id '{}'",
                element.id
            )));
        }
        let mut element = element;
        let children = std::mem::take(&mut element.children);
        let id = element.id.clone();

        self.order.push(id.clone());
        self.nodes.insert(
            id.clone(),
            Node {
                element,
                parent: parent.map(str::to_string),
                children: children.iter().map(|child| child.id.clone()).collect(),
                has_focus: false,
            },
        );
        for child in children {
            self.insert(child, Some(&id))?;
        }
        Ok(())
    }

    /// Insert a tree whose ids are known to be unique.
    fn insert_unchecked(&mut self, element: FixtureElement, parent: Option<&str>) {
        if let Err(err) = self.insert(element, parent) {
            error!(target: WORKER_TARGET, error = %err, "built-in desktop is inconsistent");
        }
    }

    fn node(&self, id: &str) -> Result<&Node, CapabilityFault> {
        self.nodes
            .get(id)
            .ok_or_else(|| CapabilityFault::NotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, CapabilityFault> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| CapabilityFault::NotFound(id.to_string()))
    }

    /// Look up an element that must accept input.
    fn enabled_mut(&mut self, id: &str) -> Result<&mut Node, CapabilityFault> {
        let node = self.node_mut(id)?;
        if !node.element.is_enabled {
            return Err(CapabilityFault::invalid(format_args!(
                "element '{id}' is not enabled"
            )));
        }
        Ok(node)
    }

    fn snapshot(&self, id: &str) -> Result<ElementSnapshot, CapabilityFault> {
        let node = self.node(id)?;
        let element = &node.element;
        Ok(ElementSnapshot {
            element_id: element.id.clone(),
            name: element.name.clone(),
            control_type: element.control_type.clone(),
            automation_id: element.automation_id.clone(),
            is_enabled: element.is_enabled,
            has_focus: node.has_focus,
            bounding_rectangle: element.bounds,
            patterns: element.patterns.clone(),
            children: node.children.clone(),
        })
    }

    fn apply(&mut self, call: &OperationCall) -> Result<Value, CapabilityFault> {
        if let Some(id) = call.element_id() {
            let node = self.node(id)?;
            if let Some(pattern) = call.operation().required_pattern() {
                if !node.element.patterns.contains(&pattern) {
                    return Err(CapabilityFault::PatternUnsupported {
                        element_id: id.to_string(),
                        pattern,
                    });
                }
            }
        }

        match call {
            OperationCall::Invoke(p) => {
                self.enabled_mut(&p.element_id)?;
                Ok(json!("Element invoked successfully"))
            }
            OperationCall::SetValue(p) => {
                let node = self.enabled_mut(&p.element_id)?;
                if node.element.read_only {
                    return Err(CapabilityFault::invalid(format_args!(
                        "element '{}' is read-only",
                        p.element_id
                    )));
                }
                node.element.value = p.value.clone();
                Ok(json!("Value set successfully"))
            }
            OperationCall::GetValue(p) => Ok(json!(self.node(&p.element_id)?.element.value)),
            OperationCall::Toggle(p) => {
                let element = &mut self.enabled_mut(&p.element_id)?.element;
                element.toggle_state = element.toggle_state.next(element.three_state);
                to_json(&element.toggle_state)
            }
            OperationCall::GetToggleState(p) => to_json(&self.node(&p.element_id)?.element.toggle_state),
            OperationCall::Expand(p) => {
                self.set_expand_state(&p.element_id, ExpandCollapseState::Expanded)?;
                Ok(json!("Element expanded successfully"))
            }
            OperationCall::Collapse(p) => {
                self.set_expand_state(&p.element_id, ExpandCollapseState::Collapsed)?;
                Ok(json!("Element collapsed successfully"))
            }
            OperationCall::GetExpandCollapseState(p) => {
                to_json(&self.node(&p.element_id)?.element.expand_state)
            }
            OperationCall::Select(p) => {
                self.enabled_mut(&p.element_id)?;
                for sibling in self.siblings(&p.element_id) {
                    if let Some(node) = self.nodes.get_mut(&sibling) {
                        node.element.selected = false;
                    }
                }
                self.node_mut(&p.element_id)?.element.selected = true;
                Ok(json!("Element selected successfully"))
            }
            OperationCall::AddToSelection(p) => {
                self.enabled_mut(&p.element_id)?;
                let others_selected = self
                    .siblings(&p.element_id)
                    .iter()
                    .any(|id| self.nodes.get(id).is_some_and(|node| node.element.selected));
                if others_selected && !self.allows_multiple_selection(&p.element_id) {
                    return Err(CapabilityFault::invalid(format_args!(
                        "container of '{}' does not support multiple selection",
                        p.element_id
                    )));
                }
                self.node_mut(&p.element_id)?.element.selected = true;
                Ok(json!("Element added to selection"))
            }
            OperationCall::RemoveFromSelection(p) => {
                self.enabled_mut(&p.element_id)?.element.selected = false;
                Ok(json!("Element removed from selection"))
            }
            OperationCall::IsSelected(p) => Ok(json!(self.node(&p.element_id)?.element.selected)),
            OperationCall::GetSelection(p) => {
                let selected: Vec<String> = self
                    .node(&p.element_id)?
                    .children
                    .iter()
                    .filter(|id| self.nodes.get(*id).is_some_and(|node| node.element.selected))
                    .cloned()
                    .collect();
                let snapshots = selected
                    .iter()
                    .map(|id| self.snapshot(id))
                    .collect::<Result<Vec<_>, _>>()?;
                to_json(&snapshots)
            }
            OperationCall::Scroll(p) => {
                let scroll = &mut self.enabled_mut(&p.element_id)?.element.scroll;
                if p.horizontal.delta_percent() != 0.0 {
                    if !scroll.horizontally_scrollable {
                        return Err(CapabilityFault::invalid("element cannot scroll horizontally"));
                    }
                    scroll.horizontal_percent =
                        (scroll.horizontal_percent + p.horizontal.delta_percent()).clamp(0.0, 100.0);
                }
                if p.vertical.delta_percent() != 0.0 {
                    if !scroll.vertically_scrollable {
                        return Err(CapabilityFault::invalid("element cannot scroll vertically"));
                    }
                    scroll.vertical_percent =
                        (scroll.vertical_percent + p.vertical.delta_percent()).clamp(0.0, 100.0);
                }
                Ok(scroll_position(scroll))
            }
            OperationCall::SetScrollPercent(p) => {
                let scroll = &mut self.enabled_mut(&p.element_id)?.element.scroll;
                let horizontal = checked_percent(p.horizontal_percent, scroll.horizontally_scrollable, "horizontal")?;
                let vertical = checked_percent(p.vertical_percent, scroll.vertically_scrollable, "vertical")?;
                if let Some(percent) = horizontal {
                    scroll.horizontal_percent = percent;
                }
                if let Some(percent) = vertical {
                    scroll.vertical_percent = percent;
                }
                Ok(scroll_position(scroll))
            }
            OperationCall::ScrollIntoView(p) => {
                self.node(&p.element_id)?;
                Ok(json!("Element scrolled into view"))
            }
            OperationCall::SetRangeValue(p) => {
                let element = &mut self.enabled_mut(&p.element_id)?.element;
                let mut range = element.range.unwrap_or_default();
                if !(range.minimum..=range.maximum).contains(&p.value) {
                    return Err(CapabilityFault::invalid(format_args!(
                        "value {} is outside the range {}..={}",
                        p.value, range.minimum, range.maximum
                    )));
                }
                range.value = p.value;
                element.range = Some(range);
                Ok(json!("Range value set successfully"))
            }
            OperationCall::GetRangeValue(p) => {
                to_json(&self.node(&p.element_id)?.element.range.unwrap_or_default())
            }
            OperationCall::SetWindowState(p) => {
                self.node_mut(&p.element_id)?.element.window_state = p.state;
                Ok(json!(format!("Window state set to {:?}", p.state)))
            }
            OperationCall::CloseWindow(p) => {
                self.remove_subtree(&p.element_id);
                Ok(json!("Window closed successfully"))
            }
            OperationCall::Move(p) => {
                let bounds = &mut self.node_mut(&p.element_id)?.element.bounds;
                bounds.x = p.x;
                bounds.y = p.y;
                Ok(json!("Element moved successfully"))
            }
            OperationCall::Resize(p) => {
                if p.width <= 0.0 || p.height <= 0.0 {
                    return Err(CapabilityFault::invalid(format_args!(
                        "size must be positive, got {}x{}",
                        p.width, p.height
                    )));
                }
                let bounds = &mut self.node_mut(&p.element_id)?.element.bounds;
                bounds.width = p.width;
                bounds.height = p.height;
                Ok(json!("Element resized successfully"))
            }
            OperationCall::GetText(p) => {
                let element = &self.node(&p.element_id)?.element;
                Ok(json!(element.text.clone().unwrap_or_else(|| element.name.clone())))
            }
            OperationCall::Focus(p) => {
                self.enabled_mut(&p.element_id)?;
                for node in self.nodes.values_mut() {
                    node.has_focus = false;
                }
                self.node_mut(&p.element_id)?.has_focus = true;
                Ok(json!("Element focused successfully"))
            }
            OperationCall::GetElementInfo(p) => to_json(&self.snapshot(&p.element_id)?),
            OperationCall::FindElements(criteria) => {
                let matches = self
                    .order
                    .iter()
                    .filter(|id| {
                        self.nodes
                            .get(*id)
                            .is_some_and(|node| matches_criteria(&node.element, criteria))
                    })
                    .map(|id| self.snapshot(id))
                    .collect::<Result<Vec<_>, _>>()?;
                to_json(&matches)
            }
        }
    }

    fn set_expand_state(&mut self, id: &str, state: ExpandCollapseState) -> Result<(), CapabilityFault> {
        let element = &mut self.enabled_mut(id)?.element;
        if element.expand_state == ExpandCollapseState::LeafNode {
            return Err(CapabilityFault::invalid(format_args!(
                "element '{id}' is a leaf node"
            )));
        }
        element.expand_state = state;
        Ok(())
    }

    fn siblings(&self, id: &str) -> Vec<String> {
        let parent = self.nodes.get(id).and_then(|node| node.parent.as_deref());
        match parent.and_then(|parent| self.nodes.get(parent)) {
            Some(parent) => parent
                .children
                .iter()
                .filter(|child| child.as_str() != id)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    fn allows_multiple_selection(&self, id: &str) -> bool {
        self.nodes
            .get(id)
            .and_then(|node| node.parent.as_deref())
            .and_then(|parent| self.nodes.get(parent))
            .is_some_and(|parent| parent.element.multiple_selection)
    }

    fn remove_subtree(&mut self, id: &str) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        if let Some(parent) = node.parent.as_deref().and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|child| child != id);
        }
        self.order.retain(|entry| entry != id);
        for child in node.children {
            self.remove_subtree(&child);
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, CapabilityFault> {
    serde_json::to_value(value).map_err(|err| CapabilityFault::Failed(err.to_string()))
}

fn scroll_position(scroll: &ScrollState) -> Value {
    json!({
        "horizontalPercent": scroll.horizontal_percent,
        "verticalPercent": scroll.vertical_percent,
    })
}

/// Negative means "leave unchanged".
fn checked_percent(percent: f64, scrollable: bool, axis: &str) -> Result<Option<f64>, CapabilityFault> {
    if percent < 0.0 {
        return Ok(None);
    }
    if !scrollable {
        return Err(CapabilityFault::invalid(format_args!(
            "element cannot scroll {axis}ly"
        )));
    }
    if percent > 100.0 || percent.is_nan() {
        return Err(CapabilityFault::invalid(format_args!(
            "{axis} scroll percent {percent} is outside 0..=100"
        )));
    }
    Ok(Some(percent))
}

fn matches_criteria(element: &FixtureElement, criteria: &FindElementsParams) -> bool {
    criteria.name.as_ref().map_or(true, |name| &element.name == name)
        && criteria
            .control_type
            .as_ref()
            .map_or(true, |control_type| &element.control_type == control_type)
        && criteria
            .automation_id
            .as_ref()
            .map_or(true, |automation_id| element.automation_id.as_ref() == Some(automation_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::operations::*;
    use crate::protocol::ScrollAmount;

    fn call(desktop: &ScriptedDesktop, call: OperationCall) -> Result<Value, CapabilityFault> {
        desktop.invoke(&call)
    }

    #[test]
    fn test_invoke_button() {
        let desktop = ScriptedDesktop::demo();
        let result = call(&desktop, OperationCall::Invoke(InvokeParams::new("btn1"))).unwrap();
        assert_eq!(result, json!("Element invoked successfully"));
    }

    #[test]
    fn test_missing_element_and_pattern() {
        let desktop = ScriptedDesktop::demo();
        let err = call(&desktop, OperationCall::GetValue(GetValueParams::new("nope"))).unwrap_err();
        assert_eq!(err, CapabilityFault::NotFound("nope".to_string()));

        let err = call(&desktop, OperationCall::Toggle(ToggleParams::new("btn1"))).unwrap_err();
        assert!(matches!(err, CapabilityFault::PatternUnsupported { pattern: Pattern::Toggle, .. }));
    }

    #[test]
    fn test_disabled_element_rejects_input() {
        let desktop = ScriptedDesktop::demo();
        let err = call(&desktop, OperationCall::Invoke(InvokeParams::new("btn2"))).unwrap_err();
        assert!(matches!(err, CapabilityFault::InvalidArgument(_)));
    }

    #[test]
    fn test_value_round_trip() {
        let desktop = ScriptedDesktop::demo();
        let set = call(
            &desktop,
            OperationCall::SetValue(SetValueParams::new("txt1", "Ada")),
        )
        .unwrap();
        assert_eq!(set, json!("Value set successfully"));
        let value = call(&desktop, OperationCall::GetValue(GetValueParams::new("txt1"))).unwrap();
        assert_eq!(value, json!("Ada"));
    }

    #[test]
    fn test_toggle_and_expand() {
        let desktop = ScriptedDesktop::demo();
        assert_eq!(
            call(&desktop, OperationCall::Toggle(ToggleParams::new("chk1"))).unwrap(),
            json!("On")
        );
        assert_eq!(
            call(&desktop, OperationCall::GetToggleState(GetToggleStateParams::new("chk1"))).unwrap(),
            json!("On")
        );

        call(&desktop, OperationCall::Expand(ExpandParams::new("tree1"))).unwrap();
        assert_eq!(
            call(
                &desktop,
                OperationCall::GetExpandCollapseState(GetExpandCollapseStateParams::new("tree1"))
            )
            .unwrap(),
            json!("Expanded")
        );
    }

    #[test]
    fn test_single_selection_replaces_previous() {
        let desktop = ScriptedDesktop::demo();
        call(&desktop, OperationCall::Select(SelectParams::new("item-red"))).unwrap();
        call(&desktop, OperationCall::Select(SelectParams::new("item-blue"))).unwrap();

        assert_eq!(
            call(&desktop, OperationCall::IsSelected(IsSelectedParams::new("item-red"))).unwrap(),
            json!(false)
        );
        let selection = call(&desktop, OperationCall::GetSelection(GetSelectionParams::new("list1"))).unwrap();
        assert_eq!(selection.as_array().unwrap().len(), 1);
        assert_eq!(selection[0]["elementId"], "item-blue");

        let err = call(
            &desktop,
            OperationCall::AddToSelection(AddToSelectionParams::new("item-green")),
        )
        .unwrap_err();
        assert!(matches!(err, CapabilityFault::InvalidArgument(_)));
    }

    #[test]
    fn test_scroll_and_range() {
        let desktop = ScriptedDesktop::demo();
        let position = call(
            &desktop,
            OperationCall::Scroll(ScrollParams {
                element_id: "list1".into(),
                horizontal: ScrollAmount::NoAmount,
                vertical: ScrollAmount::LargeIncrement,
            }),
        )
        .unwrap();
        assert_eq!(position["verticalPercent"], json!(10.0));

        let err = call(
            &desktop,
            OperationCall::SetScrollPercent(SetScrollPercentParams {
                element_id: "list1".into(),
                horizontal_percent: -1.0,
                vertical_percent: 150.0,
            }),
        )
        .unwrap_err();
        assert!(matches!(err, CapabilityFault::InvalidArgument(_)));

        let err = call(
            &desktop,
            OperationCall::SetRangeValue(SetRangeValueParams {
                element_id: "slider1".into(),
                value: 250.0,
            }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("outside the range"));

        call(
            &desktop,
            OperationCall::SetRangeValue(SetRangeValueParams {
                element_id: "slider1".into(),
                value: 75.0,
            }),
        )
        .unwrap();
        let range = call(&desktop, OperationCall::GetRangeValue(GetRangeValueParams::new("slider1"))).unwrap();
        assert_eq!(range["value"], json!(75.0));
    }

    #[test]
    fn test_window_transform_and_close() {
        let desktop = ScriptedDesktop::demo();
        call(
            &desktop,
            OperationCall::Resize(ResizeParams {
                element_id: "main".into(),
                width: 1024.0,
                height: 768.0,
            }),
        )
        .unwrap();
        let info = call(&desktop, OperationCall::GetElementInfo(GetElementInfoParams::new("main"))).unwrap();
        assert_eq!(info["boundingRectangle"]["width"], json!(1024.0));

        call(&desktop, OperationCall::CloseWindow(CloseWindowParams::new("main"))).unwrap();
        let err = call(&desktop, OperationCall::Invoke(InvokeParams::new("btn1"))).unwrap_err();
        assert!(matches!(err, CapabilityFault::NotFound(_)));
    }

    #[test]
    fn test_find_elements_and_focus() {
        let desktop = ScriptedDesktop::demo();
        let found = call(
            &desktop,
            OperationCall::FindElements(FindElementsParams {
                control_type: Some("ListItem".into()),
                ..FindElementsParams::default()
            }),
        )
        .unwrap();
        let ids: Vec<&str> = found
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["elementId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["item-red", "item-green", "item-blue"]);

        call(&desktop, OperationCall::Focus(FocusParams::new("txt1"))).unwrap();
        let info = call(&desktop, OperationCall::GetElementInfo(GetElementInfoParams::new("txt1"))).unwrap();
        assert_eq!(info["hasFocus"], json!(true));
    }

    #[test]
    fn test_fixture_parsing_and_behaviors() {
        let desktop = ScriptedDesktop::from_json(
            r#"{"elements":[
                {"id":"bad","controlType":"Button","patterns":["Invoke"],"behavior":"fail"},
                {"id":"boom","controlType":"Button","patterns":["Invoke"],"behavior":"panic"}
            ]}"#,
        )
        .unwrap();

        let err = call(&desktop, OperationCall::Invoke(InvokeParams::new("bad"))).unwrap_err();
        assert!(matches!(err, CapabilityFault::Failed(_)));

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = call(&desktop, OperationCall::Invoke(InvokeParams::new("boom")));
        }));
        assert!(panicked.is_err());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let result = ScriptedDesktop::from_json(r#"{"elements":[{"id":"a"},{"id":"a"}]}"#);
        assert!(matches!(result, Err(WorkerError::Fixture(_))));
    }

    #[test]
    fn test_get_text_falls_back_to_name() {
        let desktop = ScriptedDesktop::demo();
        assert_eq!(
            call(&desktop, OperationCall::GetText(GetTextParams::new("lbl1"))).unwrap(),
            json!("Ready")
        );
        assert_eq!(
            call(&desktop, OperationCall::GetText(GetTextParams::new("txt1"))).unwrap(),
            json!("Name")
        );
    }
}

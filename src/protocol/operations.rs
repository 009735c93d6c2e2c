//! The closed operation catalogue and its parameter DTOs.
//!
//! Every operation the worker understands is listed in [`Operation`]. Each one
//! has exactly one parameter type implementing [`OperationParams`], so the
//! controller can call any pattern through one generic path:
//!
//! ```ignore
//! let result = executor
//!     .execute_typed(&SetValueParams::new("txt1", "hello"), Duration::from_secs(5))
//!     .await;
//! ```
//!
//! On the worker side [`OperationCall::decode`] turns a name plus parameter
//! bag into a typed call, rejecting unknown names and malformed parameters.

use std::fmt;

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::element::{Pattern, ScrollAmount, WindowVisualState};
use super::Parameters;

/// A parameter DTO bound to one operation.
pub trait OperationParams: Serialize + DeserializeOwned + Send + Sync {
    /// The operation these parameters belong to.
    const OPERATION: Operation;

    /// Convert into a wire parameter bag.
    fn to_parameters(&self) -> Result<Parameters, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(Parameters::new()),
            other => Err(serde::ser::Error::custom(format!(
                "parameters must serialize to an object, got {other}"
            ))),
        }
    }

    /// Decode from a wire parameter bag.
    fn from_parameters(parameters: &Parameters) -> Result<Self, serde_json::Error> {
        let object: serde_json::Map<String, Value> = parameters
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        serde_json::from_value(Value::Object(object))
    }
}

/// Read a text parameter. Callers send scalars, so `42` and `true` are
/// accepted as `"42"` and `"true"`.
fn scalar_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string, number or bool, got {other}"
        ))),
    }
}

fn optional_scalar_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => scalar_text(value).map(Some).map_err(de::Error::custom),
    }
}

// ============================================================================
// Catalogue
// ============================================================================

macro_rules! catalogue {
    ($($variant:ident => $pattern:expr,)*) => {
        /// Operations the worker can perform.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Operation {
            $($variant,)*
        }

        impl Operation {
            /// Every operation, in catalogue order.
            pub const ALL: &'static [Operation] = &[$(Operation::$variant,)*];

            /// Wire name of the operation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Operation::$variant => stringify!($variant),)*
                }
            }

            /// Look up an operation by wire name (case-sensitive).
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $(stringify!($variant) => Some(Operation::$variant),)*
                    _ => None,
                }
            }

            /// Pattern the target element must support, if any.
            pub fn required_pattern(&self) -> Option<Pattern> {
                match self {
                    $(Operation::$variant => $pattern,)*
                }
            }
        }
    };
}

catalogue! {
    Invoke => Some(Pattern::Invoke),
    SetValue => Some(Pattern::Value),
    GetValue => Some(Pattern::Value),
    Toggle => Some(Pattern::Toggle),
    GetToggleState => Some(Pattern::Toggle),
    Expand => Some(Pattern::ExpandCollapse),
    Collapse => Some(Pattern::ExpandCollapse),
    GetExpandCollapseState => Some(Pattern::ExpandCollapse),
    Select => Some(Pattern::SelectionItem),
    AddToSelection => Some(Pattern::SelectionItem),
    RemoveFromSelection => Some(Pattern::SelectionItem),
    IsSelected => Some(Pattern::SelectionItem),
    GetSelection => Some(Pattern::Selection),
    Scroll => Some(Pattern::Scroll),
    SetScrollPercent => Some(Pattern::Scroll),
    ScrollIntoView => Some(Pattern::ScrollItem),
    SetRangeValue => Some(Pattern::RangeValue),
    GetRangeValue => Some(Pattern::RangeValue),
    SetWindowState => Some(Pattern::Window),
    CloseWindow => Some(Pattern::Window),
    Move => Some(Pattern::Transform),
    Resize => Some(Pattern::Transform),
    GetText => Some(Pattern::Text),
    Focus => None,
    GetElementInfo => None,
    FindElements => None,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Parameter DTOs
// ============================================================================

macro_rules! element_params {
    ($($(#[$meta:meta])* $name:ident => $op:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
            #[serde(rename_all = "camelCase")]
            pub struct $name {
                /// Target element.
                #[serde(deserialize_with = "scalar_text")]
                pub element_id: String,
            }

            impl $name {
                pub fn new(element_id: impl Into<String>) -> Self {
                    Self { element_id: element_id.into() }
                }
            }

            impl OperationParams for $name {
                const OPERATION: Operation = Operation::$op;
            }
        )*
    };
}

element_params! {
    /// Parameters for `Invoke`.
    InvokeParams => Invoke;
    /// Parameters for `GetValue`.
    GetValueParams => GetValue;
    /// Parameters for `Toggle`.
    ToggleParams => Toggle;
    /// Parameters for `GetToggleState`.
    GetToggleStateParams => GetToggleState;
    /// Parameters for `Expand`.
    ExpandParams => Expand;
    /// Parameters for `Collapse`.
    CollapseParams => Collapse;
    /// Parameters for `GetExpandCollapseState`.
    GetExpandCollapseStateParams => GetExpandCollapseState;
    /// Parameters for `Select`.
    SelectParams => Select;
    /// Parameters for `AddToSelection`.
    AddToSelectionParams => AddToSelection;
    /// Parameters for `RemoveFromSelection`.
    RemoveFromSelectionParams => RemoveFromSelection;
    /// Parameters for `IsSelected`.
    IsSelectedParams => IsSelected;
    /// Parameters for `GetSelection` (the container element).
    GetSelectionParams => GetSelection;
    /// Parameters for `ScrollIntoView`.
    ScrollIntoViewParams => ScrollIntoView;
    /// Parameters for `GetRangeValue`.
    GetRangeValueParams => GetRangeValue;
    /// Parameters for `CloseWindow`.
    CloseWindowParams => CloseWindow;
    /// Parameters for `GetText`.
    GetTextParams => GetText;
    /// Parameters for `Focus`.
    FocusParams => Focus;
    /// Parameters for `GetElementInfo`.
    GetElementInfoParams => GetElementInfo;
}

/// Parameters for `SetValue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetValueParams {
    #[serde(deserialize_with = "scalar_text")]
    pub element_id: String,
    /// New value text.
    #[serde(deserialize_with = "scalar_text")]
    pub value: String,
}

impl SetValueParams {
    pub fn new(element_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            value: value.into(),
        }
    }
}

impl OperationParams for SetValueParams {
    const OPERATION: Operation = Operation::SetValue;
}

/// Parameters for `Scroll`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollParams {
    #[serde(deserialize_with = "scalar_text")]
    pub element_id: String,
    #[serde(default)]
    pub horizontal: ScrollAmount,
    #[serde(default)]
    pub vertical: ScrollAmount,
}

impl OperationParams for ScrollParams {
    const OPERATION: Operation = Operation::Scroll;
}

/// Parameters for `SetScrollPercent`. Negative values leave an axis unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetScrollPercentParams {
    #[serde(deserialize_with = "scalar_text")]
    pub element_id: String,
    pub horizontal_percent: f64,
    pub vertical_percent: f64,
}

impl OperationParams for SetScrollPercentParams {
    const OPERATION: Operation = Operation::SetScrollPercent;
}

/// Parameters for `SetRangeValue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRangeValueParams {
    #[serde(deserialize_with = "scalar_text")]
    pub element_id: String,
    pub value: f64,
}

impl OperationParams for SetRangeValueParams {
    const OPERATION: Operation = Operation::SetRangeValue;
}

/// Parameters for `SetWindowState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetWindowStateParams {
    #[serde(deserialize_with = "scalar_text")]
    pub element_id: String,
    pub state: WindowVisualState,
}

impl OperationParams for SetWindowStateParams {
    const OPERATION: Operation = Operation::SetWindowState;
}

/// Parameters for `Move`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveParams {
    #[serde(deserialize_with = "scalar_text")]
    pub element_id: String,
    pub x: f64,
    pub y: f64,
}

impl OperationParams for MoveParams {
    const OPERATION: Operation = Operation::Move;
}

/// Parameters for `Resize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeParams {
    #[serde(deserialize_with = "scalar_text")]
    pub element_id: String,
    pub width: f64,
    pub height: f64,
}

impl OperationParams for ResizeParams {
    const OPERATION: Operation = Operation::Resize;
}

/// Parameters for `FindElements`. Absent criteria match everything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindElementsParams {
    #[serde(
        default,
        deserialize_with = "optional_scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub control_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_scalar_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub automation_id: Option<String>,
}

impl OperationParams for FindElementsParams {
    const OPERATION: Operation = Operation::FindElements;
}

// ============================================================================
// Decoded Calls
// ============================================================================

/// Reason a name/parameter pair could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid parameters for {operation}: {source}")]
    InvalidParameters {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },
}

/// A fully decoded operation, ready to hand to the native capability.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationCall {
    Invoke(InvokeParams),
    SetValue(SetValueParams),
    GetValue(GetValueParams),
    Toggle(ToggleParams),
    GetToggleState(GetToggleStateParams),
    Expand(ExpandParams),
    Collapse(CollapseParams),
    GetExpandCollapseState(GetExpandCollapseStateParams),
    Select(SelectParams),
    AddToSelection(AddToSelectionParams),
    RemoveFromSelection(RemoveFromSelectionParams),
    IsSelected(IsSelectedParams),
    GetSelection(GetSelectionParams),
    Scroll(ScrollParams),
    SetScrollPercent(SetScrollPercentParams),
    ScrollIntoView(ScrollIntoViewParams),
    SetRangeValue(SetRangeValueParams),
    GetRangeValue(GetRangeValueParams),
    SetWindowState(SetWindowStateParams),
    CloseWindow(CloseWindowParams),
    Move(MoveParams),
    Resize(ResizeParams),
    GetText(GetTextParams),
    Focus(FocusParams),
    GetElementInfo(GetElementInfoParams),
    FindElements(FindElementsParams),
}

fn decode<P: OperationParams>(parameters: &Parameters) -> Result<P, DecodeError> {
    P::from_parameters(parameters).map_err(|source| DecodeError::InvalidParameters {
        operation: P::OPERATION,
        source,
    })
}

impl OperationCall {
    /// Decode an operation name and parameter bag.
    pub fn decode(operation_name: &str, parameters: &Parameters) -> Result<Self, DecodeError> {
        let operation = Operation::from_name(operation_name)
            .ok_or_else(|| DecodeError::UnknownOperation(operation_name.to_string()))?;

        let call = match operation {
            Operation::Invoke => OperationCall::Invoke(decode(parameters)?),
            Operation::SetValue => OperationCall::SetValue(decode(parameters)?),
            Operation::GetValue => OperationCall::GetValue(decode(parameters)?),
            Operation::Toggle => OperationCall::Toggle(decode(parameters)?),
            Operation::GetToggleState => OperationCall::GetToggleState(decode(parameters)?),
            Operation::Expand => OperationCall::Expand(decode(parameters)?),
            Operation::Collapse => OperationCall::Collapse(decode(parameters)?),
            Operation::GetExpandCollapseState => {
                OperationCall::GetExpandCollapseState(decode(parameters)?)
            }
            Operation::Select => OperationCall::Select(decode(parameters)?),
            Operation::AddToSelection => OperationCall::AddToSelection(decode(parameters)?),
            Operation::RemoveFromSelection => {
                OperationCall::RemoveFromSelection(decode(parameters)?)
            }
            Operation::IsSelected => OperationCall::IsSelected(decode(parameters)?),
            Operation::GetSelection => OperationCall::GetSelection(decode(parameters)?),
            Operation::Scroll => OperationCall::Scroll(decode(parameters)?),
            Operation::SetScrollPercent => OperationCall::SetScrollPercent(decode(parameters)?),
            Operation::ScrollIntoView => OperationCall::ScrollIntoView(decode(parameters)?),
            Operation::SetRangeValue => OperationCall::SetRangeValue(decode(parameters)?),
            Operation::GetRangeValue => OperationCall::GetRangeValue(decode(parameters)?),
            Operation::SetWindowState => OperationCall::SetWindowState(decode(parameters)?),
            Operation::CloseWindow => OperationCall::CloseWindow(decode(parameters)?),
            Operation::Move => OperationCall::Move(decode(parameters)?),
            Operation::Resize => OperationCall::Resize(decode(parameters)?),
            Operation::GetText => OperationCall::GetText(decode(parameters)?),
            Operation::Focus => OperationCall::Focus(decode(parameters)?),
            Operation::GetElementInfo => OperationCall::GetElementInfo(decode(parameters)?),
            Operation::FindElements => OperationCall::FindElements(decode(parameters)?),
        };
        Ok(call)
    }

    /// The operation this call performs.
    pub fn operation(&self) -> Operation {
        match self {
            OperationCall::Invoke(_) => Operation::Invoke,
            OperationCall::SetValue(_) => Operation::SetValue,
            OperationCall::GetValue(_) => Operation::GetValue,
            OperationCall::Toggle(_) => Operation::Toggle,
            OperationCall::GetToggleState(_) => Operation::GetToggleState,
            OperationCall::Expand(_) => Operation::Expand,
            OperationCall::Collapse(_) => Operation::Collapse,
            OperationCall::GetExpandCollapseState(_) => Operation::GetExpandCollapseState,
            OperationCall::Select(_) => Operation::Select,
            OperationCall::AddToSelection(_) => Operation::AddToSelection,
            OperationCall::RemoveFromSelection(_) => Operation::RemoveFromSelection,
            OperationCall::IsSelected(_) => Operation::IsSelected,
            OperationCall::GetSelection(_) => Operation::GetSelection,
            OperationCall::Scroll(_) => Operation::Scroll,
            OperationCall::SetScrollPercent(_) => Operation::SetScrollPercent,
            OperationCall::ScrollIntoView(_) => Operation::ScrollIntoView,
            OperationCall::SetRangeValue(_) => Operation::SetRangeValue,
            OperationCall::GetRangeValue(_) => Operation::GetRangeValue,
            OperationCall::SetWindowState(_) => Operation::SetWindowState,
            OperationCall::CloseWindow(_) => Operation::CloseWindow,
            OperationCall::Move(_) => Operation::Move,
            OperationCall::Resize(_) => Operation::Resize,
            OperationCall::GetText(_) => Operation::GetText,
            OperationCall::Focus(_) => Operation::Focus,
            OperationCall::GetElementInfo(_) => Operation::GetElementInfo,
            OperationCall::FindElements(_) => Operation::FindElements,
        }
    }

    /// The target element, for every operation except `FindElements`.
    pub fn element_id(&self) -> Option<&str> {
        let id = match self {
            OperationCall::Invoke(p) => &p.element_id,
            OperationCall::SetValue(p) => &p.element_id,
            OperationCall::GetValue(p) => &p.element_id,
            OperationCall::Toggle(p) => &p.element_id,
            OperationCall::GetToggleState(p) => &p.element_id,
            OperationCall::Expand(p) => &p.element_id,
            OperationCall::Collapse(p) => &p.element_id,
            OperationCall::GetExpandCollapseState(p) => &p.element_id,
            OperationCall::Select(p) => &p.element_id,
            OperationCall::AddToSelection(p) => &p.element_id,
            OperationCall::RemoveFromSelection(p) => &p.element_id,
            OperationCall::IsSelected(p) => &p.element_id,
            OperationCall::GetSelection(p) => &p.element_id,
            OperationCall::Scroll(p) => &p.element_id,
            OperationCall::SetScrollPercent(p) => &p.element_id,
            OperationCall::ScrollIntoView(p) => &p.element_id,
            OperationCall::SetRangeValue(p) => &p.element_id,
            OperationCall::GetRangeValue(p) => &p.element_id,
            OperationCall::SetWindowState(p) => &p.element_id,
            OperationCall::CloseWindow(p) => &p.element_id,
            OperationCall::Move(p) => &p.element_id,
            OperationCall::Resize(p) => &p.element_id,
            OperationCall::GetText(p) => &p.element_id,
            OperationCall::Focus(p) => &p.element_id,
            OperationCall::GetElementInfo(p) => &p.element_id,
            OperationCall::FindElements(_) => return None,
        };
        Some(id)
    }
}

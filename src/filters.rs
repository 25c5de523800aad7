use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, trace};

use crate::api::{ApiRequest, Ticket};
use crate::domain::RVError;
use crate::record::{Value, number_to_json};

/// Equality constraints sent along with a report request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FilterObject(Map<String, JsonValue>);

impl FilterObject {
    /// Parses free-form JSON entered by the user. Only objects are accepted.
    pub fn parse(text: &str) -> Result<Self, RVError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        match serde_json::from_str::<JsonValue>(trimmed) {
            Ok(JsonValue::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(RVError::InvalidFilter(format!(
                "expected a JSON object, got {other}"
            ))),
            Err(e) => Err(RVError::InvalidFilter(e.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }
}

impl fmt::Display for FilterObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&JsonValue::Object(self.0.clone()).to_string())
    }
}

/// Turns a selected value into a number when the whole string is numeric.
pub fn coerce(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    if !trimmed.is_empty()
        && let Ok(n) = trimmed.parse::<f64>()
        && n.is_finite()
    {
        return number_to_json(n);
    }
    JsonValue::String(raw.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::First, Slot::Second];

    fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Slot::First => "1",
            Slot::Second => "2",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DistinctValues {
    Loading(Ticket),
    Ready(Vec<Value>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SlotState {
    #[default]
    NoField,
    FieldSelected {
        field: String,
        values: DistinctValues,
    },
    FieldAndValueSelected {
        field: String,
        values: Vec<Value>,
        value: String,
    },
}

impl SlotState {
    pub fn field(&self) -> Option<&str> {
        match self {
            SlotState::NoField => None,
            SlotState::FieldSelected { field, .. }
            | SlotState::FieldAndValueSelected { field, .. } => Some(field),
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            SlotState::FieldAndValueSelected { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Value options; empty while the lookup is in flight.
    pub fn options(&self) -> &[Value] {
        match self {
            SlotState::FieldSelected {
                values: DistinctValues::Ready(values),
                ..
            }
            | SlotState::FieldAndValueSelected { values, .. } => values,
            _ => &[],
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            SlotState::FieldSelected {
                values: DistinctValues::Loading(_),
                ..
            }
        )
    }

    fn pending_ticket(&self) -> Option<Ticket> {
        match self {
            SlotState::FieldSelected {
                values: DistinctValues::Loading(ticket),
                ..
            } => Some(*ticket),
            _ => None,
        }
    }
}

/// Label shown for a distinct value in the value selector.
pub fn option_label(value: &Value) -> String {
    if value.is_null() {
        "(empty)".to_string()
    } else {
        value.display_string()
    }
}

/// Two slot equality filter builder. Every transition recomputes the emitted
/// `FilterObject`.
#[derive(Debug, Default)]
pub struct FilterBuilder {
    collection: Option<String>,
    fields: Vec<String>,
    slots: [SlotState; 2],
    emitted: FilterObject,
}

impl FilterBuilder {
    /// Switching collections drops the field list and both slots.
    pub fn set_collection(&mut self, collection: Option<&str>) {
        self.collection = collection.map(str::to_string);
        self.fields.clear();
        self.slots = Default::default();
        self.emit();
    }

    pub fn set_fields(&mut self, fields: Vec<String>) {
        debug!("Filter fields: {fields:?}");
        self.fields = fields;
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Fields offered to `slot`; the other slot's field is left out.
    pub fn available_fields(&self, slot: Slot) -> Vec<&str> {
        let taken = self.slot(slot.other()).field();
        self.fields
            .iter()
            .map(String::as_str)
            .filter(|f| Some(*f) != taken)
            .collect()
    }

    pub fn slot(&self, slot: Slot) -> &SlotState {
        &self.slots[slot.index()]
    }

    pub fn filter_object(&self) -> &FilterObject {
        &self.emitted
    }

    pub fn has_active_filter(&self) -> bool {
        !self.emitted.is_empty()
    }

    pub fn value_selector_enabled(&self, slot: Slot) -> bool {
        let state = self.slot(slot);
        state.field().is_some() && !state.is_loading()
    }

    /// Selects a field for `slot` and returns the distinct value lookup to dispatch
    /// under `ticket`. Any earlier value of the slot is cleared.
    pub fn select_field(&mut self, slot: Slot, field: &str, ticket: Ticket) -> Result<ApiRequest, RVError> {
        let collection = self.collection.clone().ok_or(RVError::NoCollection)?;
        if self.slot(slot.other()).field() == Some(field) {
            return Err(RVError::FieldInUse(field.to_string()));
        }
        trace!("Slot {} field -> {field} ({ticket:?})", slot.label());
        self.slots[slot.index()] = SlotState::FieldSelected {
            field: field.to_string(),
            values: DistinctValues::Loading(ticket),
        };
        self.emit();
        Ok(ApiRequest::DistinctValues {
            collection,
            field: field.to_string(),
        })
    }

    /// Picks the option at `option` from the slot's distinct values. Choosing an
    /// empty value leaves the slot without a value.
    pub fn select_value(&mut self, slot: Slot, option: usize) -> Result<(), RVError> {
        let state = &self.slots[slot.index()];
        let field = state.field().ok_or(RVError::NoFieldSelected)?.to_string();
        if state.is_loading() {
            return Err(RVError::ValuesLoading);
        }
        let values = state.options().to_vec();
        let value = values
            .get(option)
            .ok_or(RVError::UnknownOption(option))?
            .display_string();

        trace!("Slot {} value -> {value:?}", slot.label());
        self.slots[slot.index()] = if value.is_empty() {
            SlotState::FieldSelected {
                field,
                values: DistinctValues::Ready(values),
            }
        } else {
            SlotState::FieldAndValueSelected {
                field,
                values,
                value,
            }
        };
        self.emit();
        Ok(())
    }

    pub fn clear_field(&mut self, slot: Slot) {
        self.slots[slot.index()] = SlotState::NoField;
        self.emit();
    }

    pub fn clear_all(&mut self) {
        self.slots = Default::default();
        self.emit();
    }

    /// Stores a finished lookup. Returns false when the ticket no longer belongs to
    /// the slot's current field.
    pub fn apply_distinct_values(&mut self, ticket: Ticket, values: Vec<Value>) -> bool {
        match self.pending_slot(ticket) {
            Some(slot) => {
                debug!("Slot {} received {} values", slot.label(), values.len());
                self.set_ready(slot, values);
                true
            }
            None => {
                debug!("Discarding stale distinct values for {ticket:?}");
                false
            }
        }
    }

    /// A failed lookup leaves the slot with no options.
    pub fn fail_distinct_values(&mut self, ticket: Ticket, err: &RVError) -> bool {
        match self.pending_slot(ticket) {
            Some(slot) => {
                error!("Loading values for filter {} failed: {err}", slot.label());
                self.set_ready(slot, Vec::new());
                true
            }
            None => {
                debug!("Discarding stale failure for {ticket:?}: {err}");
                false
            }
        }
    }

    fn pending_slot(&self, ticket: Ticket) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|s| self.slot(*s).pending_ticket() == Some(ticket))
    }

    fn set_ready(&mut self, slot: Slot, values: Vec<Value>) {
        let field = match &self.slots[slot.index()] {
            SlotState::FieldSelected { field, .. } => field.clone(),
            _ => return,
        };
        self.slots[slot.index()] = SlotState::FieldSelected {
            field,
            values: DistinctValues::Ready(values),
        };
    }

    fn emit(&mut self) {
        let mut filter = Map::new();
        for state in &self.slots {
            if let (Some(field), Some(value)) = (state.field(), state.value())
                && !value.is_empty()
                && !filter.contains_key(field)
            {
                filter.insert(field.to_string(), coerce(value));
            }
        }
        self.emitted = FilterObject(filter);
        debug!("Filter object: {}", self.emitted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TicketCounter;
    use serde_json::json;

    fn builder() -> (FilterBuilder, TicketCounter) {
        let mut b = FilterBuilder::default();
        b.set_collection(Some("games"));
        b.set_fields(vec!["Genre".into(), "Year".into(), "Title".into()]);
        (b, TicketCounter::default())
    }

    fn text(values: &[&str]) -> Vec<Value> {
        values.iter().map(|v| Value::Text(v.to_string())).collect()
    }

    #[test]
    fn coerces_numeric_strings() {
        assert_eq!(coerce("2019"), json!(2019));
        assert_eq!(coerce("4.5"), json!(4.5));
        assert_eq!(coerce("Action"), json!("Action"));
        assert_eq!(coerce("12abc"), json!("12abc"));
        assert_eq!(coerce("inf"), json!("inf"));
    }

    #[test]
    fn parses_json_filters() {
        let f = FilterObject::parse(r#"{"Genre": "RPG", "Year": 2019}"#).unwrap();
        assert_eq!(f.iter().count(), 2);
        assert_eq!(f.to_string(), r#"{"Genre":"RPG","Year":2019}"#);
        assert!(FilterObject::parse("  ").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_json_filters() {
        assert!(matches!(FilterObject::parse("{Genre: RPG}"), Err(RVError::InvalidFilter(_))));
        assert!(matches!(FilterObject::parse("[1, 2]"), Err(RVError::InvalidFilter(_))));
    }

    #[test]
    fn field_then_value_emits_filter() {
        let (mut b, mut tickets) = builder();
        let ticket = tickets.next();
        let request = b.select_field(Slot::First, "Genre", ticket).unwrap();
        assert_eq!(
            request,
            ApiRequest::DistinctValues {
                collection: "games".into(),
                field: "Genre".into()
            }
        );
        assert!(b.slot(Slot::First).is_loading());
        assert!(b.slot(Slot::First).options().is_empty());
        assert!(!b.value_selector_enabled(Slot::First));
        assert!(b.filter_object().is_empty());

        assert!(b.apply_distinct_values(ticket, text(&["Action", "RPG"])));
        assert!(b.value_selector_enabled(Slot::First));
        b.select_value(Slot::First, 1).unwrap();
        assert_eq!(b.slot(Slot::First).value(), Some("RPG"));
        assert_eq!(b.filter_object().to_string(), r#"{"Genre":"RPG"}"#);
    }

    #[test]
    fn numeric_values_are_coerced() {
        let (mut b, mut tickets) = builder();
        let ticket = tickets.next();
        b.select_field(Slot::Second, "Year", ticket).unwrap();
        b.apply_distinct_values(ticket, vec![Value::Number(2018.0), Value::Number(2019.0)]);
        b.select_value(Slot::Second, 1).unwrap();
        assert_eq!(b.filter_object().to_string(), r#"{"Year":2019}"#);
    }

    #[test]
    fn second_slot_cannot_reuse_first_field() {
        let (mut b, mut tickets) = builder();
        b.select_field(Slot::First, "Genre", tickets.next()).unwrap();
        assert_eq!(b.available_fields(Slot::Second), vec!["Year", "Title"]);
        let err = b.select_field(Slot::Second, "Genre", tickets.next()).unwrap_err();
        assert!(matches!(err, RVError::FieldInUse(f) if f == "Genre"));
        assert_eq!(b.slot(Slot::Second), &SlotState::NoField);
    }

    #[test]
    fn reselecting_field_clears_value() {
        let (mut b, mut tickets) = builder();
        let t1 = tickets.next();
        b.select_field(Slot::First, "Genre", t1).unwrap();
        b.apply_distinct_values(t1, text(&["RPG"]));
        b.select_value(Slot::First, 0).unwrap();
        assert!(b.has_active_filter());

        b.select_field(Slot::First, "Title", tickets.next()).unwrap();
        assert_eq!(b.slot(Slot::First).value(), None);
        assert!(!b.has_active_filter());
    }

    #[test]
    fn stale_values_do_not_overwrite_current_field() {
        let (mut b, mut tickets) = builder();
        let stale = tickets.next();
        b.select_field(Slot::First, "Genre", stale).unwrap();
        let current = tickets.next();
        b.select_field(Slot::First, "Year", current).unwrap();

        assert!(b.apply_distinct_values(current, vec![Value::Number(2019.0)]));
        assert!(!b.apply_distinct_values(stale, text(&["Action", "RPG"])));
        assert_eq!(b.slot(Slot::First).field(), Some("Year"));
        assert_eq!(b.slot(Slot::First).options(), &[Value::Number(2019.0)]);
    }

    #[test]
    fn stale_values_arriving_first_are_ignored() {
        let (mut b, mut tickets) = builder();
        let stale = tickets.next();
        b.select_field(Slot::First, "Genre", stale).unwrap();
        let current = tickets.next();
        b.select_field(Slot::First, "Year", current).unwrap();

        assert!(!b.apply_distinct_values(stale, text(&["Action"])));
        assert!(b.slot(Slot::First).is_loading());
    }

    #[test]
    fn failed_lookup_degrades_to_no_options() {
        let (mut b, mut tickets) = builder();
        let ticket = tickets.next();
        b.select_field(Slot::First, "Genre", ticket).unwrap();
        assert!(b.fail_distinct_values(ticket, &RVError::Backend("offline".into())));
        assert!(!b.slot(Slot::First).is_loading());
        assert!(b.slot(Slot::First).options().is_empty());
        assert!(matches!(b.select_value(Slot::First, 0), Err(RVError::UnknownOption(0))));
    }

    #[test]
    fn empty_value_keeps_slot_without_value() {
        let (mut b, mut tickets) = builder();
        let ticket = tickets.next();
        b.select_field(Slot::First, "Genre", ticket).unwrap();
        b.apply_distinct_values(ticket, vec![Value::Null, Value::Text("RPG".into())]);
        b.select_value(Slot::First, 0).unwrap();
        assert_eq!(b.slot(Slot::First).value(), None);
        assert!(b.filter_object().is_empty());
        assert_eq!(option_label(&Value::Null), "(empty)");
    }

    #[test]
    fn clearing_field_and_all() {
        let (mut b, mut tickets) = builder();
        let (t1, t2) = (tickets.next(), tickets.next());
        b.select_field(Slot::First, "Genre", t1).unwrap();
        b.select_field(Slot::Second, "Year", t2).unwrap();
        b.apply_distinct_values(t1, text(&["RPG"]));
        b.apply_distinct_values(t2, vec![Value::Number(2019.0)]);
        b.select_value(Slot::First, 0).unwrap();
        b.select_value(Slot::Second, 0).unwrap();
        assert_eq!(b.filter_object().to_string(), r#"{"Genre":"RPG","Year":2019}"#);

        b.clear_field(Slot::First);
        assert_eq!(b.slot(Slot::First), &SlotState::NoField);
        assert_eq!(b.filter_object().to_string(), r#"{"Year":2019}"#);

        b.clear_all();
        assert!(b.filter_object().is_empty());
        assert_eq!(b.slot(Slot::Second), &SlotState::NoField);
    }

    #[test]
    fn late_values_for_cleared_slot_are_dropped() {
        let (mut b, mut tickets) = builder();
        let ticket = tickets.next();
        b.select_field(Slot::First, "Genre", ticket).unwrap();
        b.clear_field(Slot::First);
        assert!(!b.apply_distinct_values(ticket, text(&["RPG"])));
        assert_eq!(b.slot(Slot::First), &SlotState::NoField);
    }

    #[test]
    fn selecting_field_needs_collection() {
        let mut b = FilterBuilder::default();
        let mut tickets = TicketCounter::default();
        assert!(matches!(
            b.select_field(Slot::First, "Genre", tickets.next()),
            Err(RVError::NoCollection)
        ));
    }
}

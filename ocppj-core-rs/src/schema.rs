//! Explicit payload schemas
//!
//! A `PayloadSchema` is a list of named fields, each with an occurrence
//! (required/optional) and a `FieldKind` carrying the kind-specific bounds.
//! Schemas are plain data, built once when the registry is populated.

use crate::types::Role;

/// Primitive kind of a field plus its bounds
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String { max_len: Option<usize> },
    Integer { min: Option<i64>, max: Option<i64> },
    Decimal { min: Option<f64>, max: Option<f64> },
    Boolean,
    Timestamp,
    Enum(&'static [&'static str]),
    Object(PayloadSchema),
    Array {
        items: Box<FieldKind>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
}

impl FieldKind {
    /// String of at most `max_len` characters (OCPP CiStringNType)
    pub fn string(max_len: usize) -> Self {
        FieldKind::String {
            max_len: Some(max_len),
        }
    }

    pub fn any_string() -> Self {
        FieldKind::String { max_len: None }
    }

    pub fn integer() -> Self {
        FieldKind::Integer {
            min: None,
            max: None,
        }
    }

    pub fn non_negative_integer() -> Self {
        FieldKind::Integer {
            min: Some(0),
            max: None,
        }
    }

    pub fn positive_integer() -> Self {
        FieldKind::Integer {
            min: Some(1),
            max: None,
        }
    }

    pub fn integer_range(min: i64, max: i64) -> Self {
        FieldKind::Integer {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn decimal() -> Self {
        FieldKind::Decimal {
            min: None,
            max: None,
        }
    }

    pub fn non_negative_decimal() -> Self {
        FieldKind::Decimal {
            min: Some(0.0),
            max: None,
        }
    }

    pub fn boolean() -> Self {
        FieldKind::Boolean
    }

    pub fn timestamp() -> Self {
        FieldKind::Timestamp
    }

    pub fn one_of(values: &'static [&'static str]) -> Self {
        FieldKind::Enum(values)
    }

    pub fn object(schema: PayloadSchema) -> Self {
        FieldKind::Object(schema)
    }

    pub fn array_of(items: FieldKind) -> Self {
        FieldKind::Array {
            items: Box::new(items),
            min_items: None,
            max_items: None,
        }
    }

    /// Non-empty array
    pub fn list_of(items: FieldKind) -> Self {
        FieldKind::Array {
            items: Box::new(items),
            min_items: Some(1),
            max_items: None,
        }
    }

    /// Name used in type violation messages
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String { .. } => "string",
            FieldKind::Integer { .. } => "integer",
            FieldKind::Decimal { .. } => "decimal",
            FieldKind::Boolean => "boolean",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Enum(_) => "string",
            FieldKind::Object(_) => "object",
            FieldKind::Array { .. } => "array",
        }
    }
}

/// One named field of a payload
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub required: bool,
    pub kind: FieldKind,
}

/// What to do with payload members that the schema does not declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownFields {
    Reject,
    Permit,
}

/// Shape of a request or confirmation payload
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadSchema {
    fields: Vec<FieldSchema>,
    unknown_fields: UnknownFields,
}

impl PayloadSchema {
    /// Schema rejecting undeclared fields
    pub fn strict() -> Self {
        Self {
            fields: Vec::new(),
            unknown_fields: UnknownFields::Reject,
        }
    }

    /// Schema ignoring undeclared fields
    pub fn permissive() -> Self {
        Self {
            fields: Vec::new(),
            unknown_fields: UnknownFields::Permit,
        }
    }

    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            required: true,
            kind,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            required: false,
            kind,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn unknown_fields(&self) -> UnknownFields {
        self.unknown_fields
    }
}

/// A named action with its request/confirmation schema pair
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDefinition {
    pub name: String,
    pub request: PayloadSchema,
    pub confirmation: PayloadSchema,
    /// The central system receives and answers this action
    pub allowed_on_central_system: bool,
    /// The charge point receives and answers this action
    pub allowed_on_charge_point: bool,
}

impl ActionDefinition {
    pub fn new(
        name: impl Into<String>,
        request: PayloadSchema,
        confirmation: PayloadSchema,
    ) -> Self {
        Self {
            name: name.into(),
            request,
            confirmation,
            allowed_on_central_system: false,
            allowed_on_charge_point: false,
        }
    }

    /// Mark `role` as a receiver of this action
    pub fn received_by(mut self, role: Role) -> Self {
        match role {
            Role::CentralSystem => self.allowed_on_central_system = true,
            Role::ChargePoint => self.allowed_on_charge_point = true,
        }
        self
    }

    /// Whether `role` may receive and answer this action
    pub fn allowed_on(&self, role: Role) -> bool {
        match role {
            Role::CentralSystem => self.allowed_on_central_system,
            Role::ChargePoint => self.allowed_on_charge_point,
        }
    }
}

/// A named bundle of related actions registered together
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub actions: Vec<ActionDefinition>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: ActionDefinition) -> Self {
        self.actions.push(action);
        self
    }
}

//! Structural payload schemas keyed by `(version, handler)`.
//!
//! Schemas are static tables compiled into the binary. A handler without a
//! schema accepts any object payload; shape checks for those happen in the
//! application handlers behind the coordinator.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Max transactions accepted in one `postTransactions` call
pub const MAX_TRANSACTIONS_PER_REQUEST: usize = 40;

/// Max block ids in one `getCommonBlocks` call
pub const MAX_COMMON_BLOCK_IDS: usize = 10;

/// Max blocks requested by one `getBlocks` call
pub const MAX_BLOCK_LIMIT: i64 = 400;

/// Max size of a hex-encoded serialized block
pub const MAX_SERIALIZED_BLOCK_LEN: usize = 2 * 1024 * 1024;

/// Kind of a single payload field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// JSON integer within optional bounds (inclusive)
    Integer { min: Option<i64>, max: Option<i64> },
    Boolean,
    String { max_len: usize },
    Object,
    /// Array of any values
    Array { max_items: usize },
    /// Array of block ids (64-char hex or up to 20 decimal digits)
    BlockIdList { min_items: usize, max_items: usize },
    /// Non-empty even-length hex string
    Hex { max_len: usize },
}

/// One named field of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// Structural schema of one handler's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSchema {
    pub fields: &'static [FieldSpec],
    pub additional_properties: bool,
}

/// Typed schema failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("payload must be an object")]
    NotAnObject,

    #[error("unexpected field: {0}")]
    UnexpectedField(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

const EMPTY: PayloadSchema = PayloadSchema {
    fields: &[],
    additional_properties: false,
};

const GET_BLOCKS: PayloadSchema = PayloadSchema {
    fields: &[
        FieldSpec {
            name: "lastBlockHeight",
            kind: FieldKind::Integer {
                min: Some(1),
                max: None,
            },
            required: true,
        },
        FieldSpec {
            name: "blockLimit",
            kind: FieldKind::Integer {
                min: Some(1),
                max: Some(MAX_BLOCK_LIMIT),
            },
            required: false,
        },
        FieldSpec {
            name: "headersOnly",
            kind: FieldKind::Boolean,
            required: false,
        },
        FieldSpec {
            name: "serialized",
            kind: FieldKind::Boolean,
            required: false,
        },
    ],
    additional_properties: false,
};

const GET_COMMON_BLOCKS: PayloadSchema = PayloadSchema {
    fields: &[FieldSpec {
        name: "ids",
        kind: FieldKind::BlockIdList {
            min_items: 1,
            max_items: MAX_COMMON_BLOCK_IDS,
        },
        required: true,
    }],
    additional_properties: false,
};

const POST_BLOCK: PayloadSchema = PayloadSchema {
    fields: &[FieldSpec {
        name: "block",
        kind: FieldKind::Hex {
            max_len: MAX_SERIALIZED_BLOCK_LEN,
        },
        required: true,
    }],
    additional_properties: false,
};

const POST_TRANSACTIONS: PayloadSchema = PayloadSchema {
    fields: &[FieldSpec {
        name: "transactions",
        kind: FieldKind::Array {
            max_items: MAX_TRANSACTIONS_PER_REQUEST,
        },
        required: true,
    }],
    additional_properties: false,
};

const EMIT_EVENT: PayloadSchema = PayloadSchema {
    fields: &[
        FieldSpec {
            name: "event",
            kind: FieldKind::String { max_len: 128 },
            required: true,
        },
        FieldSpec {
            name: "body",
            kind: FieldKind::Object,
            required: true,
        },
    ],
    additional_properties: false,
};

const BUILTIN: &[(&str, &str, PayloadSchema)] = &[
    ("peer", "getPeers", EMPTY),
    ("peer", "getStatus", EMPTY),
    ("peer", "getBlocks", GET_BLOCKS),
    ("peer", "getCommonBlocks", GET_COMMON_BLOCKS),
    ("peer", "postBlock", POST_BLOCK),
    ("peer", "postTransactions", POST_TRANSACTIONS),
    ("internal", "emitEvent", EMIT_EVENT),
    ("internal", "getUnconfirmedTransactions", EMPTY),
    ("internal", "getCurrentRound", EMPTY),
    ("internal", "getNetworkState", EMPTY),
    ("internal", "syncBlockchain", EMPTY),
];

/// Schema table, immutable after construction
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    schemas: HashMap<&'static str, HashMap<&'static str, PayloadSchema>>,
}

impl SchemaValidator {
    /// Table with the built-in peer and internal schemas
    pub fn builtin() -> Self {
        let mut schemas: HashMap<&'static str, HashMap<&'static str, PayloadSchema>> =
            HashMap::new();
        for (version, handler, schema) in BUILTIN {
            schemas.entry(*version).or_default().insert(*handler, *schema);
        }
        Self { schemas }
    }

    pub fn schema(&self, version: &str, handler: &str) -> Option<&PayloadSchema> {
        self.schemas.get(version)?.get(handler)
    }

    /// Validate `payload` against the schema for `(version, handler)`.
    ///
    /// Handlers without a schema accept any object.
    pub fn validate(
        &self,
        version: &str,
        handler: &str,
        payload: &Value,
    ) -> Result<(), SchemaViolation> {
        let object = payload.as_object().ok_or(SchemaViolation::NotAnObject)?;
        match self.schema(version, handler) {
            Some(schema) => schema.check(object),
            None => Ok(()),
        }
    }

    /// Number of `(version, handler)` schemas
    pub fn len(&self) -> usize {
        self.schemas.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl PayloadSchema {
    fn check(&self, object: &Map<String, Value>) -> Result<(), SchemaViolation> {
        if !self.additional_properties {
            if let Some(key) = object
                .keys()
                .find(|key| !self.fields.iter().any(|f| f.name == key.as_str()))
            {
                return Err(SchemaViolation::UnexpectedField(key.clone()));
            }
        }

        for field in self.fields {
            match object.get(field.name) {
                Some(value) => field.check(value)?,
                None if field.required => return Err(SchemaViolation::MissingField(field.name)),
                None => {}
            }
        }

        Ok(())
    }
}

impl FieldSpec {
    fn check(&self, value: &Value) -> Result<(), SchemaViolation> {
        let invalid = |reason: String| SchemaViolation::InvalidField {
            field: self.name,
            reason,
        };

        match self.kind {
            FieldKind::Integer { min, max } => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| invalid("expected integer".into()))?;
                if min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max) {
                    return Err(invalid(format!("{} out of range", n)));
                }
            }
            FieldKind::Boolean => {
                if !value.is_boolean() {
                    return Err(invalid("expected boolean".into()));
                }
            }
            FieldKind::String { max_len } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid("expected string".into()))?;
                if s.len() > max_len {
                    return Err(invalid(format!("longer than {}", max_len)));
                }
            }
            FieldKind::Object => {
                if !value.is_object() {
                    return Err(invalid("expected object".into()));
                }
            }
            FieldKind::Array { max_items } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| invalid("expected array".into()))?;
                if items.len() > max_items {
                    return Err(invalid(format!("more than {} items", max_items)));
                }
            }
            FieldKind::BlockIdList {
                min_items,
                max_items,
            } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| invalid("expected array".into()))?;
                if items.len() < min_items || items.len() > max_items {
                    return Err(invalid(format!(
                        "expected {}..={} items, got {}",
                        min_items,
                        max_items,
                        items.len()
                    )));
                }
                if !items
                    .iter()
                    .all(|item| item.as_str().is_some_and(is_block_id))
                {
                    return Err(invalid("expected block ids".into()));
                }
            }
            FieldKind::Hex { max_len } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid("expected hex string".into()))?;
                if s.is_empty()
                    || s.len() > max_len
                    || s.len() % 2 != 0
                    || !s.bytes().all(|b| b.is_ascii_hexdigit())
                {
                    return Err(invalid("expected even-length hex".into()));
                }
            }
        }

        Ok(())
    }
}

/// 64-char hex block id, or a legacy numeric id of up to 20 digits
fn is_block_id(s: &str) -> bool {
    (s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()))
        || (!s.is_empty() && s.len() <= 20 && s.bytes().all(|b| b.is_ascii_digit()))
}

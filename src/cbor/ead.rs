//! Pre-parsing of External Authorization Data (EAD) items.

use std::collections::BTreeSet;

use serde_cbor::Value;

use super::as_int;

/// The label of the padding EAD item.
pub const PADDING_LABEL: i64 = 0;

/// How the EAD items of a message are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EadConvention {
    /// Every label is followed by a byte string value, so the items always
    /// come in pairs.
    ForcedPairs,
    /// A label is followed by a byte string value only if the item has one.
    OptionalValue,
}

/// Returns the supported EAD items starting at `base`, or `None` if the item
/// list has to be rejected.
///
/// The padding item and unsupported non-critical items are skipped.
/// A critical (negative) label that is not supported rejects the list.
///
/// # Arguments
/// * `items` - The items of the decoded message or plaintext.
/// * `base` - Index of the first EAD item in `items`.
/// * `supported` - Absolute values of the supported EAD labels.
/// * `convention` - The layout of the EAD items.
pub fn pre_parse_ead(
    items: &[Value],
    base: usize,
    supported: &BTreeSet<i64>,
    convention: EadConvention,
) -> Option<Vec<Value>> {
    let tail = items.get(base..).unwrap_or(&[]);
    match convention {
        EadConvention::ForcedPairs => pre_parse_pairs(tail, supported),
        EadConvention::OptionalValue => pre_parse_optional(tail, supported),
    }
}

fn pre_parse_pairs(
    tail: &[Value],
    supported: &BTreeSet<i64>,
) -> Option<Vec<Value>> {
    if tail.len() % 2 != 0 {
        return None;
    }

    let mut ead = Vec::with_capacity(tail.len());
    for pair in tail.chunks(2) {
        let label = as_int(&pair[0])?;
        if !matches!(pair[1], Value::Bytes(_)) {
            return None;
        }
        if label == PADDING_LABEL {
            continue;
        }
        if supported.contains(&label.abs()) {
            ead.extend_from_slice(pair);
        } else if label < 0 {
            return None;
        }
    }

    Some(ead)
}

fn pre_parse_optional(
    tail: &[Value],
    supported: &BTreeSet<i64>,
) -> Option<Vec<Value>> {
    let mut ead = Vec::with_capacity(tail.len());
    let mut index = 0;
    while index < tail.len() {
        let label_item = &tail[index];
        let label = as_int(label_item)?;
        let value = match tail.get(index + 1) {
            Some(value @ Value::Bytes(_)) => Some(value),
            // Next label or end of the list
            Some(Value::Integer(_)) | None => None,
            Some(_) => return None,
        };
        index += if value.is_some() { 2 } else { 1 };

        if label == PADDING_LABEL {
            continue;
        }
        if !supported.contains(&label.abs()) {
            if label < 0 {
                return None;
            }
            continue;
        }
        ead.push(label_item.clone());
        if let Some(value) = value {
            ead.push(value.clone());
        }
    }

    Some(ead)
}

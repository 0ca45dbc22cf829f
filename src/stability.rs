//! Provider Stability Checker (debug/test only)
//!
//! Catches one specific correctness bug class: a cache provider that captures
//! caller-local state which silently differs between two logically identical
//! calls. The cache keeps whichever provider arrived first, so a second
//! provider capturing different state would make the cached value wrong for
//! one of the callers, and nothing on the hot path would ever notice.
//!
//! Where a reflective runtime would walk captured fields directly, this crate
//! uses the explicit [`Inspectable`] trait: a provider opts in by describing
//! its captured state as a list of [`CapturedField`]s, and the checker
//! compares two descriptions structurally. Lists and byte arrays get deep
//! equality, weak indirections are dereferenced before comparing, and nested
//! inspectables are recursed into under a depth cap that guards against
//! cyclic provider graphs.
//!
//! This is a development-time assertion, not a runtime safety net: findings
//! are logged (once per key, to avoid spam), never thrown, and never alter
//! program behavior.

use std::fmt;
use std::sync::{Arc, Weak};

use hashbrown::HashSet;
use parking_lot::Mutex;

use crate::registry::SlotKey;

/// Maximum recursion depth when walking captured provider state. A walk this
/// deep almost certainly means a cyclic provider graph, which is itself
/// reported as a defect.
const MAX_WALK_DEPTH: u32 = 100;

/// Structural view of a provider's captured state.
///
/// Implement this on struct providers that should participate in the
/// stability check. Closure providers are opaque and skip the field walk.
pub trait Inspectable: Send + Sync {
    /// The implementing type's name, for diagnostics.
    fn type_label(&self) -> &'static str;

    /// The captured fields, in declaration order.
    fn captured_fields(&self) -> Vec<CapturedField>;
}

/// One captured field of a provider.
#[derive(Debug, Clone)]
pub struct CapturedField {
    /// Field name as declared.
    pub name: &'static str,
    /// The field's value, reduced to a comparable form.
    pub value: FieldValue,
}

impl CapturedField {
    /// Convenience constructor.
    pub fn new(name: &'static str, value: FieldValue) -> Self {
        Self { name, value }
    }
}

/// A captured field value in comparable form.
///
/// `Nested` marks a field that is itself closure-like and is recursed into;
/// every other variant must compare equal or the check fails. `Identity`
/// covers fields with no meaningful value equality (compared by address).
#[derive(Clone)]
pub enum FieldValue {
    /// Boolean field.
    Bool(bool),
    /// Signed integer field (widened).
    Int(i64),
    /// Floating-point field (widened). NaN compares equal to NaN here.
    Float(f64),
    /// String field.
    Text(String),
    /// Raw byte array, compared deeply.
    Bytes(Vec<u8>),
    /// Array/collection field, compared element-wise and deeply.
    List(Vec<FieldValue>),
    /// A nested closure-like value; recursed into rather than compared.
    Nested(Arc<dyn Inspectable>),
    /// A weak indirection; dereferenced, then compared like `Nested`.
    /// Two cleared indirections compare equal.
    Indirect(Weak<dyn Inspectable>),
    /// Address-identity of a field with no value equality.
    Identity(usize),
    /// An absent optional field.
    Absent,
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(v) => write!(f, "{v:?}"),
            FieldValue::Bytes(v) => write!(f, "{} bytes", v.len()),
            FieldValue::List(v) => f.debug_list().entries(v).finish(),
            FieldValue::Nested(v) => write!(f, "nested {}", v.type_label()),
            FieldValue::Indirect(v) => match v.upgrade() {
                Some(target) => write!(f, "indirect {}", target.type_label()),
                None => write!(f, "indirect <cleared>"),
            },
            FieldValue::Identity(v) => write!(f, "identity {v:#x}"),
            FieldValue::Absent => write!(f, "<absent>"),
        }
    }
}

/// What the checker can see of one provider instance: its type name, its
/// address, and (if it opted in) its captured fields.
pub struct ProviderView<'a> {
    /// Provider type name.
    pub label: &'static str,
    /// Provider instance address, for the trivial same-instance pass.
    pub identity: usize,
    /// Captured state, when the provider is [`Inspectable`].
    pub fields: Option<&'a dyn Inspectable>,
}

impl fmt::Debug for ProviderView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderView")
            .field("label", &self.label)
            .field("inspectable", &self.fields.is_some())
            .finish()
    }
}

/// Verifies that two provider instances used for the same cache key capture
/// equivalent state. Findings are logged once per key; the check never blocks
/// progress and never alters behavior.
pub struct ProviderStabilityChecker {
    enabled: bool,
    reported: Mutex<HashSet<SlotKey>>,
}

impl ProviderStabilityChecker {
    /// Creates a checker; a disabled checker is a no-op.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// Compares the provider already installed for `key` against a
    /// replacement provider supplied by a later call.
    pub fn check_equivalent(
        &self,
        key: &SlotKey,
        installed: &ProviderView<'_>,
        replacement: &ProviderView<'_>,
    ) {
        if !self.enabled || installed.identity == replacement.identity {
            return;
        }
        let Some(defect) = Self::find_defect(installed, replacement) else {
            return;
        };
        if self.reported.lock().insert(*key) {
            tracing::error!(
                key = key.name(),
                installed = installed.label,
                replacement = replacement.label,
                defect = %defect,
                "providers for the same cache key capture different state"
            );
        }
    }

    fn find_defect(
        installed: &ProviderView<'_>,
        replacement: &ProviderView<'_>,
    ) -> Option<String> {
        if installed.label != replacement.label {
            let field_count = |view: &ProviderView<'_>| {
                view.fields.map_or(0, |i| i.captured_fields().len())
            };
            // Two independently generated closures for the same source lambda
            // share a path prefix and capture the same number of fields.
            let same_source = match (closure_prefix(installed.label), closure_prefix(replacement.label)) {
                (Some(a), Some(b)) => a == b && field_count(installed) == field_count(replacement),
                _ => false,
            };
            if same_source {
                return None;
            }
            return Some(format!(
                "different provider types registered for one key: {} vs {}",
                installed.label, replacement.label
            ));
        }

        match (installed.fields, replacement.fields) {
            (Some(a), Some(b)) => compare_inspectables(a, b, 0).err(),
            // Opaque providers of the same type cannot be walked.
            _ => None,
        }
    }
}

impl fmt::Debug for ProviderStabilityChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderStabilityChecker")
            .field("enabled", &self.enabled)
            .field("reported_keys", &self.reported.lock().len())
            .finish()
    }
}

fn closure_prefix(label: &str) -> Option<&str> {
    label.find("{{closure}}").map(|at| &label[..at])
}

fn compare_inspectables(
    a: &dyn Inspectable,
    b: &dyn Inspectable,
    depth: u32,
) -> Result<(), String> {
    if depth > MAX_WALK_DEPTH {
        return Err(format!(
            "captured state of {} nests deeper than {MAX_WALK_DEPTH} levels; provider graph is likely cyclic",
            a.type_label()
        ));
    }
    let fields_a = a.captured_fields();
    let fields_b = b.captured_fields();
    if fields_a.len() != fields_b.len() {
        return Err(format!(
            "captured field count differs in {}: {} vs {}",
            a.type_label(),
            fields_a.len(),
            fields_b.len()
        ));
    }
    for (field_a, field_b) in fields_a.iter().zip(&fields_b) {
        if field_a.name != field_b.name {
            return Err(format!(
                "field order differs in {}: `{}` vs `{}`",
                a.type_label(),
                field_a.name,
                field_b.name
            ));
        }
        values_match(&field_a.value, &field_b.value, depth).map_err(|detail| {
            format!(
                "field `{}` of {} differs: {detail}",
                field_a.name,
                a.type_label()
            )
        })?;
    }
    Ok(())
}

fn values_match(a: &FieldValue, b: &FieldValue, depth: u32) -> Result<(), String> {
    match (a, b) {
        (FieldValue::Bool(x), FieldValue::Bool(y)) if x == y => Ok(()),
        (FieldValue::Int(x), FieldValue::Int(y)) if x == y => Ok(()),
        (FieldValue::Float(x), FieldValue::Float(y)) if x == y || (x.is_nan() && y.is_nan()) => {
            Ok(())
        }
        (FieldValue::Text(x), FieldValue::Text(y)) if x == y => Ok(()),
        (FieldValue::Bytes(x), FieldValue::Bytes(y)) if x == y => Ok(()),
        (FieldValue::List(x), FieldValue::List(y)) => {
            if x.len() != y.len() {
                return Err(format!("list length {} vs {}", x.len(), y.len()));
            }
            for (item_a, item_b) in x.iter().zip(y) {
                values_match(item_a, item_b, depth)?;
            }
            Ok(())
        }
        (FieldValue::Nested(x), FieldValue::Nested(y)) => {
            compare_inspectables(x.as_ref(), y.as_ref(), depth + 1)
        }
        (FieldValue::Indirect(x), FieldValue::Indirect(y)) => match (x.upgrade(), y.upgrade()) {
            (None, None) => Ok(()),
            (Some(x), Some(y)) => compare_inspectables(x.as_ref(), y.as_ref(), depth + 1),
            _ => Err("one indirection is cleared, the other is live".to_string()),
        },
        (FieldValue::Identity(x), FieldValue::Identity(y)) if x == y => Ok(()),
        (FieldValue::Absent, FieldValue::Absent) => Ok(()),
        _ => Err(format!("{a:?} != {b:?}")),
    }
}

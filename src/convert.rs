//! Value conversion: raw cell text to typed [`Value`]s.
//!
//! Primitive and enum targets are parsed directly. Types listed in the reference-type set are
//! resolved through a host [`ReferenceResolver`] ("load the existing object with this identifier")
//! when direct parsing has nothing to offer.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::directory::TypeDirectory;
use crate::types::{DataType, Value};

/// Host lookup of existing persistent objects by identifier text.
pub trait ReferenceResolver: Send + Sync {
    /// Resolve `text` as an object of `type_name`; `None` when nothing matches.
    fn load_reference(&self, text: &str, type_name: &str) -> Option<Value>;
}

impl<F> ReferenceResolver for F
where
    F: Fn(&str, &str) -> Option<Value> + Send + Sync,
{
    fn load_reference(&self, text: &str, type_name: &str) -> Option<Value> {
        self(text, type_name)
    }
}

/// Fixed table of `(type, text) -> identifier` references.
#[derive(Debug, Clone, Default)]
pub struct StaticReferenceResolver {
    entries: HashMap<(String, String), String>,
}

impl StaticReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        type_name: impl Into<String>,
        text: impl Into<String>,
        identifier: impl Into<String>,
    ) -> &mut Self {
        self.entries
            .insert((type_name.into(), text.into()), identifier.into());
        self
    }
}

impl ReferenceResolver for StaticReferenceResolver {
    fn load_reference(&self, text: &str, type_name: &str) -> Option<Value> {
        self.entries
            .get(&(type_name.to_string(), text.trim().to_string()))
            .cloned()
            .map(Value::Reference)
    }
}

/// Outcome of converting one non-blank cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Converted(Value),
    /// No primitive/enum parse, and the type is not a reference type.
    Unparsable,
    /// The type is a reference type but the resolver found nothing.
    UnresolvedReference,
}

/// Converts cell text for one import run.
pub struct ConversionRegistry<'a> {
    directory: &'a TypeDirectory,
    reference_types: HashSet<String>,
    resolver: Option<Arc<dyn ReferenceResolver>>,
}

impl fmt::Debug for ConversionRegistry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionRegistry")
            .field("reference_types", &self.reference_types)
            .field("resolver_set", &self.resolver.is_some())
            .finish()
    }
}

impl<'a> ConversionRegistry<'a> {
    pub fn new(directory: &'a TypeDirectory) -> Self {
        Self {
            directory,
            reference_types: HashSet::new(),
            resolver: None,
        }
    }

    pub fn with_reference_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reference_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn with_resolver(mut self, resolver: Option<Arc<dyn ReferenceResolver>>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Primitive/enum conversion. `raw` must be non-blank.
    ///
    /// `None` means "no direct conversion": not necessarily an error, see [`Self::convert_cell`].
    pub fn convert(&self, data_type: &DataType, raw: &str) -> Option<Value> {
        match data_type {
            DataType::Utf8 => Some(Value::Utf8(raw.to_string())),
            DataType::Int64 => raw.trim().parse::<i64>().ok().map(Value::Int64),
            // NaN and infinities have no JSON form; a stored record holding one could not be reloaded.
            DataType::Float64 => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float64),
            DataType::Bool => parse_bool(raw.trim()).map(Value::Bool),
            DataType::Enum(name) | DataType::Object(name) => self.parse_enum(name, raw.trim()),
            DataType::Array(_) => None,
        }
    }

    /// True when `data_type` names a configured reference type.
    pub fn is_reference_type(&self, data_type: &DataType) -> bool {
        data_type
            .type_name()
            .is_some_and(|n| self.reference_types.contains(n))
    }

    /// Resolve `raw` through the reference resolver, if one is configured.
    pub fn resolve_reference(&self, data_type: &DataType, raw: &str) -> Option<Value> {
        let type_name = data_type.type_name()?;
        self.resolver
            .as_ref()
            .and_then(|r| r.load_reference(raw.trim(), type_name))
    }

    /// Direct conversion, falling back to reference resolution for reference types.
    pub fn convert_cell(&self, data_type: &DataType, raw: &str) -> Conversion {
        if let Some(v) = self.convert(data_type, raw) {
            return Conversion::Converted(v);
        }
        if !self.is_reference_type(data_type) {
            return Conversion::Unparsable;
        }
        match self.resolve_reference(data_type, raw) {
            Some(v) => Conversion::Converted(v),
            None => Conversion::UnresolvedReference,
        }
    }

    /// True if cells of `element` can ever convert (used for array members).
    pub fn supports_element(&self, element: &DataType) -> bool {
        match element {
            DataType::Int64 | DataType::Float64 | DataType::Bool | DataType::Utf8 | DataType::Enum(_) => true,
            DataType::Object(name) => {
                self.reference_types.contains(name) || self.directory.find_enum(name).is_some()
            }
            DataType::Array(_) => false,
        }
    }

    fn parse_enum(&self, name: &str, text: &str) -> Option<Value> {
        let ty = self.directory.find_enum(name)?;
        let variants = ty.enum_variants()?;
        if let Some((variant, _)) = variants.iter().find(|(v, _)| v == text) {
            return Some(Value::Enum(variant.clone()));
        }
        let n = text.parse::<i64>().ok()?;
        variants
            .iter()
            .find(|(_, value)| *value == n)
            .map(|(variant, _)| Value::Enum(variant.clone()))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Conversion, ConversionRegistry, ReferenceResolver, StaticReferenceResolver};
    use crate::directory::{TypeDescriptor, TypeDirectory};
    use crate::types::{DataType, Value};

    fn directory() -> TypeDirectory {
        TypeDirectory::from_types(vec![TypeDescriptor::enumeration(
            "Rarity",
            ["Common", "Rare", "Epic"],
        )])
    }

    #[test]
    fn converts_primitives() {
        let dir = directory();
        let conv = ConversionRegistry::new(&dir);
        assert_eq!(conv.convert(&DataType::Int64, " 42 "), Some(Value::Int64(42)));
        assert_eq!(conv.convert(&DataType::Float64, "1.5"), Some(Value::Float64(1.5)));
        assert_eq!(conv.convert(&DataType::Bool, "Yes"), Some(Value::Bool(true)));
        assert_eq!(conv.convert(&DataType::Utf8, " a b "), Some(Value::Utf8(" a b ".into())));
        assert_eq!(conv.convert(&DataType::Int64, "1,000"), None);
        assert_eq!(conv.convert(&DataType::Bool, "maybe"), None);
    }

    #[test]
    fn non_finite_floats_are_unparsable() {
        let dir = directory();
        let conv = ConversionRegistry::new(&dir);
        for raw in ["NaN", "inf", "-infinity", "1e400"] {
            assert!(matches!(conv.convert_cell(&DataType::Float64, raw), Conversion::Unparsable), "{raw}");
        }
        assert_eq!(conv.convert(&DataType::Float64, "-1e300"), Some(Value::Float64(-1e300)));
    }

    #[test]
    fn converts_enum_by_name_or_value() {
        let dir = directory();
        let conv = ConversionRegistry::new(&dir);
        let rarity = DataType::Enum("Rarity".into());
        assert_eq!(conv.convert(&rarity, "Rare"), Some(Value::Enum("Rare".into())));
        assert_eq!(conv.convert(&rarity, "2"), Some(Value::Enum("Epic".into())));
        assert_eq!(conv.convert(&rarity, "rare"), None);
        assert_eq!(
            conv.convert(&DataType::Object("Rarity".into()), "Common"),
            Some(Value::Enum("Common".into()))
        );
    }

    #[test]
    fn reference_types_fall_back_to_resolver() {
        let dir = directory();
        let mut refs = StaticReferenceResolver::new();
        refs.insert("Sprite", "sword", "sprites/sword");
        let resolver: Arc<dyn ReferenceResolver> = Arc::new(refs);
        let conv = ConversionRegistry::new(&dir)
            .with_reference_types(["Sprite"])
            .with_resolver(Some(resolver));

        let sprite = DataType::Object("Sprite".into());
        assert_eq!(
            conv.convert_cell(&sprite, "sword"),
            Conversion::Converted(Value::Reference("sprites/sword".into()))
        );
        assert_eq!(conv.convert_cell(&sprite, "shield"), Conversion::UnresolvedReference);
        assert_eq!(
            conv.convert_cell(&DataType::Object("Mesh".into()), "cube"),
            Conversion::Unparsable
        );
    }

    #[test]
    fn closure_resolver_is_accepted() {
        let dir = directory();
        let resolver: Arc<dyn ReferenceResolver> =
            Arc::new(|text: &str, ty: &str| Some(Value::Reference(format!("{ty}/{text}"))));
        let conv = ConversionRegistry::new(&dir)
            .with_reference_types(["Item"])
            .with_resolver(Some(resolver));
        assert_eq!(
            conv.convert_cell(&DataType::Object("Item".into()), "potion"),
            Conversion::Converted(Value::Reference("Item/potion".into()))
        );
    }

    #[test]
    fn nested_arrays_are_unsupported_elements() {
        let dir = directory();
        let conv = ConversionRegistry::new(&dir);
        assert!(conv.supports_element(&DataType::Utf8));
        assert!(conv.supports_element(&DataType::Object("Rarity".into())));
        assert!(!conv.supports_element(&DataType::Object("Unknown".into())));
        assert!(!conv.supports_element(&DataType::Array(Box::new(DataType::Int64))));
    }
}

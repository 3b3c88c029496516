//! `var type="…"` resolution: no reflection, no implicit assembly
//! auto-loading. A type string is a plain Rust type, validated by parsing
//! it with `syn`; its top-level path segment is cross-checked against the
//! item's declared imports so the resolver can register the implicit
//! import/reference side effects.

use syn::Type;

use crate::error::Error;

/// A resolved `var` type: the original string (used verbatim in generated
/// code) plus the parsed `syn::Type` (used to validate it's a real type
/// and to walk its generic arguments).
#[derive(Debug, Clone)]
pub struct TypeBinding {
    pub raw: String,
    pub parsed: Type,
}

impl PartialEq for TypeBinding {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

/// Parse `type_name` as a Rust type. Recurses into angle-bracket generic
/// arguments, returning every path segment's leading identifier so the
/// resolver can register an implicit import for each.
pub fn resolve(var_name: &str, type_name: &str) -> Result<(TypeBinding, Vec<String>), Error> {
    let parsed: Type = syn::parse_str(type_name).map_err(|e| Error::TypeResolution {
        var_name: var_name.to_string(),
        type_name: type_name.to_string(),
        reason: e.to_string(),
    })?;

    let mut leading_idents = Vec::new();
    collect_leading_idents(&parsed, &mut leading_idents);

    Ok((TypeBinding { raw: type_name.to_string(), parsed }, leading_idents))
}

fn collect_leading_idents(ty: &Type, out: &mut Vec<String>) {
    match ty {
        Type::Path(tp) => {
            if let Some(seg) = tp.path.segments.first() {
                out.push(seg.ident.to_string());
            }
            for seg in &tp.path.segments {
                if let syn::PathArguments::AngleBracketed(ab) = &seg.arguments {
                    for arg in &ab.args {
                        if let syn::GenericArgument::Type(inner) = arg {
                            collect_leading_idents(inner, out);
                        }
                    }
                }
            }
        }
        Type::Reference(r) => collect_leading_idents(&r.elem, out),
        Type::Tuple(t) => {
            for elem in &t.elems {
                collect_leading_idents(elem, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_simple_type() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (binding, idents) = resolve("n", "i32").unwrap();
        assert_eq!(binding.raw, "i32");
        assert_eq!(idents, vec!["i32".to_string()]);
    }

    #[test]
    fn resolves_parameterized_type_recursively() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (_binding, idents) = resolve("xs", "Vec<String>").unwrap();
        assert_eq!(idents, vec!["Vec".to_string(), "String".to_string()]);
    }

    #[test]
    fn rejects_unparsable_type() {
        let _ = env_logger::builder().is_test(true).try_init();
        let err = resolve("n", "not a type <<<").unwrap_err();
        assert!(matches!(err, Error::TypeResolution { .. }));
    }
}

//! Name-based type resolution.
//!
//! Managed display names are ambiguous: `Game.World.Zone` may name a type `Zone` in
//! namespace `Game.World`, or a type `Zone` nested in `Game.World`, or even one nested two
//! levels deep in a namespace-less `Game`. The resolver tries the interpretations in a fixed
//! order so that the same input always yields the same type:
//!
//! 1. The whole string as a simple name in the empty namespace.
//! 2. For names containing `.` or `+`, every split point `k` from low to high: tokens
//!    `[0, k)` form the namespace, token `k` the outer type, and each following token must
//!    name a *direct* nested type of the previous one. The first complete chain wins.
//! 3. A plain split at the last `.` into namespace and simple name.
//!
//! Resolution failure is not an error; an invalid [`Type`] is returned instead.

use crate::{
    runtime::{self, ClassPtr, ImagePtr, Runtime},
    types::{names::name_tokens, Type},
    Result,
};

/// Resolves a simple, dotted or `+`-nested name in an image.
///
/// # Errors
/// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
pub fn resolve(image: ImagePtr, name: &str) -> Result<Type> {
    let rt = runtime::get()?;
    let class = resolve_class(rt, image, name);
    match class {
        Some(_) => tracing::trace!(name, "type resolved"),
        None => tracing::debug!(name, "type not resolved"),
    }
    Ok(Type::wrap_opt(rt, class))
}

/// Resolves a namespace and name in an image.
///
/// A plain `name` is looked up directly. A `name` containing `.` or `+` is joined to the
/// namespace and resolved through the nested-name search only.
///
/// # Errors
/// Returns [`crate::Error::RuntimeNotInitialized`] if no runtime is installed.
pub fn resolve_in_namespace(image: ImagePtr, namespace: &str, name: &str) -> Result<Type> {
    let rt = runtime::get()?;
    if !name.contains(['.', '+']) {
        return Ok(Type::wrap_opt(rt, rt.class_from_name(image, namespace, name)));
    }

    let full = if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    };
    Ok(Type::wrap_opt(rt, resolve_split(rt, image, &name_tokens(&full))))
}

pub(crate) fn resolve_class(rt: &dyn Runtime, image: ImagePtr, name: &str) -> Option<ClassPtr> {
    if name.is_empty() {
        return None;
    }

    if let Some(class) = rt.class_from_name(image, "", name) {
        return Some(class);
    }

    if name.contains(['.', '+']) {
        if let Some(class) = resolve_split(rt, image, &name_tokens(name)) {
            return Some(class);
        }
    }

    let (namespace, simple) = name.rsplit_once('.')?;
    rt.class_from_name(image, namespace, simple)
}

fn resolve_split(rt: &dyn Runtime, image: ImagePtr, tokens: &[&str]) -> Option<ClassPtr> {
    for (split, outer) in tokens.iter().enumerate() {
        if outer.is_empty() {
            continue;
        }
        let namespace = tokens[..split].join(".");
        let Some(class) = rt.class_from_name(image, &namespace, outer) else {
            continue;
        };

        let chain = tokens[split + 1..]
            .iter()
            .try_fold(class, |current, nested| direct_nested(rt, current, nested));
        if chain.is_some() {
            return chain;
        }
    }
    None
}

fn direct_nested(rt: &dyn Runtime, outer: ClassPtr, name: &str) -> Option<ClassPtr> {
    rt.class_nested_types(outer)
        .into_iter()
        .find(|nested| rt.class_name(*nested) == name)
}

//! Preset registry (A2): the one concrete instance of the "external
//! collaborator" the core specification names but leaves unimplemented.
//!
//! Grounded in the reference implementation's `rassumfrassum.preset_loader`
//! and its bundled `rassumfrassum.presets.*` modules: a preset is a list
//! of backend command lines plus, where the original preset carried
//! custom logic (`vue`), a [`RoutingPolicy`] decorator wrapping
//! [`DefaultPolicy`].
//!
//! The reference implementation also supported loading a preset from an
//! arbitrary file path (`'/' in name_or_path`) via `importlib`. That
//! mechanism is inherently tied to a dynamically-loaded scripting
//! runtime and has no faithful Rust equivalent without embedding a
//! scripting language or dynamic linking; this registry only resolves
//! the bundled names, consistent with the specification's framing of
//! file-based/dynamically-loaded presets as a documented extension
//! point rather than a required feature.

mod vue;

use lspmux::policy::{DefaultPolicy, RoutingPolicy};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("unknown preset `{0}`")]
    UnknownPreset(String),
}

/// One resolved preset: the backend argvs to spawn (in order; the first
/// becomes the primary backend) and, if the preset needs to customize
/// routing, a policy to use in place of [`DefaultPolicy`].
pub struct Preset {
    pub backend_argvs: Vec<Vec<String>>,
    pub policy: Option<Box<dyn RoutingPolicy>>,
}

impl Preset {
    fn plain(backend_argvs: Vec<Vec<String>>) -> Self {
        Self {
            backend_argvs,
            policy: None,
        }
    }
}

/// Resolves a built-in preset by name.
///
/// Mirrors the reference implementation's `load_preset`, minus the
/// file-path-loading branch (see module docs). The original bundle was
/// itself inconsistent about the export name a preset module provides
/// (`python.get_servers()` vs. `tsbiome.servers()`, and `sveltetail.py`
/// never defines `get_logic_class` at all) — this registry normalizes
/// that to one uniform, statically-checked shape rather than reproducing
/// the inconsistency.
pub fn load_preset(name: &str) -> Result<Preset, PresetError> {
    match name {
        "python" => Ok(Preset::plain(vec![
            vec!["basedpyright-langserver".to_string(), "--stdio".to_string()],
            vec!["ruff".to_string(), "server".to_string()],
        ])),
        "typescript" | "tsbiome" => Ok(Preset::plain(vec![
            vec!["typescript-language-server".to_string(), "--stdio".to_string()],
            vec!["biome".to_string(), "lsp-proxy".to_string()],
        ])),
        "svelte" | "sveltetail" => Ok(Preset::plain(vec![
            vec!["svelteserver".to_string(), "--stdio".to_string()],
            vec!["tailwindcss-language-server".to_string(), "--stdio".to_string()],
        ])),
        "vue" => Ok(Preset {
            backend_argvs: vec![
                vec!["vue-language-server".to_string(), "--stdio".to_string()],
                vec!["tailwindcss-language-server".to_string(), "--stdio".to_string()],
            ],
            policy: Some(Box::new(vue::VuePolicy::new(DefaultPolicy))),
        }),
        other => Err(PresetError::UnknownPreset(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_preset_resolves_two_backends() {
        let preset = load_preset("python").unwrap();
        assert_eq!(preset.backend_argvs.len(), 2);
        assert!(preset.policy.is_none());
    }

    #[test]
    fn tsbiome_is_reachable_under_both_names() {
        assert_eq!(
            load_preset("typescript").unwrap().backend_argvs,
            load_preset("tsbiome").unwrap().backend_argvs
        );
    }

    #[test]
    fn vue_preset_carries_a_policy_decorator() {
        let preset = load_preset("vue").unwrap();
        assert!(preset.policy.is_some());
    }

    #[test]
    fn unknown_preset_is_an_error() {
        assert!(matches!(load_preset("nope"), Err(PresetError::UnknownPreset(_))));
    }
}

//! Snapshotter credential resolution.
//!
//! A snapshot class may name the secret the storage agent needs through the
//! `csi.storage.k8s.io/snapshotter-secret-name` and `-namespace`
//! parameters. Both are templates:
//!
//! | placeholder | name | namespace |
//! |---|---|---|
//! | `${volumesnapshotcontent.name}` | yes | yes |
//! | `${volumesnapshot.namespace}` | yes | yes |
//! | `${volumesnapshot.name}` | yes | no |

use std::collections::BTreeMap;
use std::sync::LazyLock;

use itertools::Itertools;
use regex::{Captures, Regex};
use vsnap_core::VolumeSnapshot;
use vsnap_core::constants::{PARAM_SNAPSHOTTER_SECRET_NAME, PARAM_SNAPSHOTTER_SECRET_NAMESPACE};

use crate::error::{Error, Result};

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}]*)\}").expect("valid placeholder regex (verified by tests)")
});

#[allow(clippy::expect_used)]
static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid label regex (verified by tests)")
});

#[allow(clippy::expect_used)]
static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid subdomain regex (verified by tests)")
});

const MAX_LABEL_LEN: usize = 63;
const MAX_SUBDOMAIN_LEN: usize = 253;

/// Name and namespace of a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

/// Resolve the snapshotter secret for `snapshot` from class `parameters`.
///
/// Returns `None` when the class names no secret.
///
/// # Errors
///
/// Returns `Validation` if only one of the two parameters is given, a
/// template uses an unknown placeholder, or a resolved value is not a valid
/// DNS name.
pub fn resolve_snapshotter_secret(
    parameters: &BTreeMap<String, String>,
    content_name: &str,
    snapshot: &VolumeSnapshot,
) -> Result<Option<SecretReference>> {
    let name_template = parameters.get(PARAM_SNAPSHOTTER_SECRET_NAME);
    let namespace_template = parameters.get(PARAM_SNAPSHOTTER_SECRET_NAMESPACE);

    let (name_template, namespace_template) = match (name_template, namespace_template) {
        (None, None) => return Ok(None),
        (Some(name), Some(namespace)) => (name, namespace),
        _ => {
            return Err(Error::validation(format!(
                "{PARAM_SNAPSHOTTER_SECRET_NAME} and {PARAM_SNAPSHOTTER_SECRET_NAMESPACE} must be given together"
            )));
        }
    };

    let namespace = expand(namespace_template, |key| match key {
        "volumesnapshotcontent.name" => Some(content_name),
        "volumesnapshot.namespace" => Some(snapshot.namespace()),
        _ => None,
    })?;
    if namespace.len() > MAX_LABEL_LEN || !DNS_LABEL.is_match(&namespace) {
        return Err(Error::validation(format!(
            "secret namespace '{namespace}' resolved from '{namespace_template}' is not a valid DNS label"
        )));
    }

    let name = expand(name_template, |key| match key {
        "volumesnapshotcontent.name" => Some(content_name),
        "volumesnapshot.namespace" => Some(snapshot.namespace()),
        "volumesnapshot.name" => Some(snapshot.name()),
        _ => None,
    })?;
    if name.len() > MAX_SUBDOMAIN_LEN || !DNS_SUBDOMAIN.is_match(&name) {
        return Err(Error::validation(format!(
            "secret name '{name}' resolved from '{name_template}' is not a valid DNS subdomain"
        )));
    }

    Ok(Some(SecretReference { name, namespace }))
}

fn expand<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> Result<String> {
    let unknown = PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|key| lookup(key).is_none())
        .unique()
        .join(", ");
    if !unknown.is_empty() {
        return Err(Error::validation(format!(
            "template '{template}' uses unsupported placeholders: {unknown}"
        )));
    }

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            caps.get(1)
                .and_then(|m| lookup(m.as_str()))
                .unwrap_or_default()
                .to_string()
        })
        .into_owned())
}

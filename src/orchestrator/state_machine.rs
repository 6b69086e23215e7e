//! The per-domain deploy state machine (C7):
//!
//! ```text
//! Idle --enqueue--> Pulling --ok--> Creating --ok--> Starting --healthy--> Swapping --> Done
//!                      |               |                 |
//!                      +----fail-----> Failed (old container keeps serving)
//! ```
//!
//! This module holds the pure, synchronous pieces of the machine — the
//! state enum and the image/route matching logic — so they're testable
//! without spinning up an engine or an event loop. [`super::Orchestrator`]
//! drives the actual transitions.

use std::fmt;

/// Where a single domain's in-flight deploy currently sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployState {
    /// No deploy in flight.
    Idle,
    /// Pulling the target image.
    Pulling,
    /// Creating the new container.
    Creating,
    /// New container started; waiting for it to become healthy.
    Starting,
    /// Flipping the routing table pointer to the new container.
    Swapping,
    /// Deploy finished; the new container is serving.
    Done,
    /// Deploy failed; the prior container (if any) keeps serving.
    Failed(String),
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployState::Idle => f.write_str("idle"),
            DeployState::Pulling => f.write_str("pulling"),
            DeployState::Creating => f.write_str("creating"),
            DeployState::Starting => f.write_str("starting"),
            DeployState::Swapping => f.write_str("swapping"),
            DeployState::Done => f.write_str("done"),
            DeployState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Splits `image_ref` (e.g. `reg.example.com/app:latest` or `app:latest`)
/// into its repository path and tag.
fn split_image_ref(image_ref: &str) -> Option<(&str, &str)> {
    image_ref.rsplit_once(':')
}

/// Strips a leading registry-domain component from `path`, Docker's own
/// convention: the first `/`-separated segment is a host (not part of the
/// repository name) only if it contains a `.` or a `:`. Multi-segment
/// repository names like `myorg/app` are left untouched.
fn strip_registry_domain(path: &str) -> &str {
    match path.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') => rest,
        _ => path,
    }
}

/// Whether a `RegistryPush{name, tag}` should trigger a deploy of a route
/// configured with `route_image` — true when the route's image reference
/// resolves to the same repository and tag, ignoring any registry-domain
/// prefix.
pub fn route_matches_push(route_image: &str, pushed_name: &str, pushed_tag: &str) -> bool {
    let Some((path, tag)) = split_image_ref(route_image) else {
        return false;
    };
    if tag != pushed_tag {
        return false;
    }
    strip_registry_domain(path) == pushed_name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_bare_image_reference() {
        assert!(route_matches_push("app:latest", "app", "latest"));
    }

    #[test]
    fn matches_domain_qualified_image_reference() {
        assert!(route_matches_push("reg.example.com/app:latest", "app", "latest"));
    }

    #[test]
    fn rejects_mismatched_tag() {
        assert!(!route_matches_push("reg.example.com/app:v1", "app", "v2"));
    }

    #[test]
    fn rejects_mismatched_repository() {
        assert!(!route_matches_push("reg.example.com/other:latest", "app", "latest"));
    }

    #[test]
    fn rejects_image_without_tag() {
        assert!(!route_matches_push("reg.example.com/app", "app", "latest"));
    }

    #[test]
    fn matches_multi_segment_repository_name() {
        assert!(route_matches_push("reg.example.com/myorg/app:latest", "myorg/app", "latest"));
    }

    #[test]
    fn matches_bare_multi_segment_repository_name() {
        assert!(route_matches_push("myorg/app:latest", "myorg/app", "latest"));
    }

    #[test]
    fn does_not_truncate_multi_segment_repository_to_last_path_component() {
        assert!(!route_matches_push("reg.example.com/myorg/app:latest", "app", "latest"));
    }

    #[test]
    fn display_renders_failed_reason() {
        assert_eq!(DeployState::Failed("pull timed out".to_string()).to_string(), "failed: pull timed out");
    }
}

//! Event types flowing from the registry and admin API into the orchestrator
//! (C7). Modeled as a typed MPSC queue per the redesign note in §9: one
//! channel, one concrete enum, rather than an untyped in-process bus.

use crate::registry::digest::Digest;

/// A manifest was written and bound to a tag; the orchestrator should
/// consider deploying any route whose image resolves to `name:tag`.
#[derive(Debug, Clone)]
pub struct RegistryPush {
    /// Repository name the manifest was pushed to.
    pub name: String,
    /// Tag the manifest was bound to.
    pub tag: String,
    /// The manifest's content digest.
    pub digest: Digest,
}

/// The config/route model changed; the orchestrator should reconcile routes
/// that have none running and remove containers for deleted routes.
#[derive(Debug, Clone)]
pub enum ConfigChanged {
    /// A single route was added, updated, or removed.
    Route(String),
    /// The whole configuration was reloaded (signal or admin endpoint).
    Reloaded,
}

/// An admin-initiated request to the orchestrator.
#[derive(Debug, Clone)]
pub enum AdminCommand {
    /// Force a deploy for `domain` regardless of its current image digest.
    DeployNow {
        /// The route's domain.
        domain: String,
    },
    /// Restart the container(s) for `domain`.
    Restart {
        /// The route's domain.
        domain: String,
        /// Whether to also restart attachments (otherwise left running).
        with_attachments: bool,
    },
}

/// Anything that can land in the orchestrator's event queue.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// See [`RegistryPush`].
    Push(RegistryPush),
    /// See [`ConfigChanged`].
    Config(ConfigChanged),
    /// See [`AdminCommand`].
    Admin(AdminCommand),
    /// Periodic reconciliation tick.
    Tick,
}

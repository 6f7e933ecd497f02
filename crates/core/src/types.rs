/// Node identifiers are opaque string keys of the workflow graph.
pub type NodeId = String;

/// Server-assigned job identifier returned by `POST /prompt`.
pub type PromptId = String;

/// Locally generated token scoping one event subscription.
pub type ClientId = String;

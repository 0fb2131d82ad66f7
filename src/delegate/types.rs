use uuid::Uuid;

/// Which transfer shape an operation was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Request,
    Upload,
    Download,
}

/// Identifies the operation invoking a hook, for context-sensitive delegates
/// (e.g. logging which concrete operation failed).
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub id: Uuid,
    pub kind: OperationKind,
}

pub(crate) mod correction;
pub(crate) mod locks;
pub(crate) mod reconcile;
pub(crate) mod scoring;

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("batch '{0}' does not exist")]
    UnknownBatch(uuid::Uuid),

    #[error("catalog error: {0}")]
    Catalog(#[from] crate::catalog::CatalogError),

    #[error("post-processing error: {0}")]
    PostProcess(#[from] crate::postprocess::PostProcessError),
}

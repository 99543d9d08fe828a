mod registry;

pub use registry::{EndpointCatalogue, EndpointSpec, DEFAULT_HD_MODEL_VERSION};

//! OpenAPI 3.0 document model and Swagger UI page for Trellis
//!
//! The document types serialize to the JSON served at `/openapi.json`.
//! Paths and methods are kept in ordered maps, so the same set of routes
//! always renders to the same bytes.
//!
//! ## Building a document
//!
//! ```
//! use trellis_openapi::{OpenApiBuilder, OperationBuilder, Response};
//!
//! let spec = OpenApiBuilder::new("My API", "1.0.0")
//!     .operation(
//!         "/hello",
//!         "GET",
//!         OperationBuilder::new()
//!             .summary("Says hello")
//!             .response("200", Response::new("Successful response"))
//!             .build(),
//!     )
//!     .build();
//!
//! assert_eq!(spec.info.title, "My API");
//! assert_eq!(spec.operation_count(), 1);
//! assert!(spec.operation("/hello", "get").is_some());
//! ```
//!
//! ## Swagger UI
//!
//! ```
//! use trellis_openapi::{swagger_ui_html, SwaggerConfig};
//!
//! let html = swagger_ui_html(&SwaggerConfig::new("/openapi.json").with_title("My API"));
//! assert!(html.contains("/openapi.json"));
//! ```

pub mod builder;
pub mod spec;
pub mod swagger;

pub use builder::*;
pub use spec::*;
pub use swagger::*;

//! API description of the live route table

use crate::registry::{Parameter, Registry, Route};
use trellis_openapi::{self as openapi, OpenApiBuilder, OpenApiSpec, OperationBuilder, Response, Schema};

/// Build an OpenAPI document from a snapshot of `registry`.
///
/// Nothing is cached: every call sees the latest registrations.
pub fn api_document(registry: &Registry, title: &str, version: &str) -> OpenApiSpec {
    registry
        .routes()
        .iter()
        .fold(OpenApiBuilder::new(title, version), |builder, route| {
            builder.operation(route.path.clone(), &route.method, operation(route))
        })
        .build()
}

fn operation(route: &Route) -> openapi::Operation {
    let builder = OperationBuilder::new().summary(route.description.clone());
    let builder = route
        .responses
        .iter()
        .fold(builder, |builder, (status, description)| {
            builder.response(status.to_string(), Response::new(description.clone()))
        });
    route
        .parameters
        .iter()
        .fold(builder, |builder, parameter| builder.parameter(document(parameter)))
        .build()
}

fn document(parameter: &Parameter) -> openapi::Parameter {
    openapi::Parameter {
        name: parameter.name.clone(),
        location: parameter.location,
        description: Some(parameter.description.clone()),
        required: parameter.required,
        schema: Some(Schema::of_type(parameter.param_type.clone())),
    }
}

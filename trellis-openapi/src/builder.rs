//! Builders for assembling OpenAPI documents programmatically

use crate::spec::*;
use std::collections::BTreeMap;

/// OpenAPI version emitted by [`OpenApiBuilder`]
pub const OPENAPI_VERSION: &str = "3.0.0";

/// Builder for OpenAPI documents
#[derive(Debug, Clone)]
pub struct OpenApiBuilder {
    spec: OpenApiSpec,
}

impl OpenApiBuilder {
    /// Create a new OpenAPI builder
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            spec: OpenApiSpec {
                openapi: OPENAPI_VERSION.to_string(),
                info: Info {
                    title: title.into(),
                    version: version.into(),
                    description: None,
                },
                paths: BTreeMap::new(),
                components: Components::default(),
            },
        }
    }

    /// Set description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.spec.info.description = Some(description.into());
        self
    }

    /// Add or replace a whole path item
    pub fn path(mut self, path: impl Into<String>, item: PathItem) -> Self {
        self.spec.paths.insert(path.into(), item);
        self
    }

    /// Add one operation, grouping it under its path
    pub fn operation(mut self, path: impl Into<String>, method: &str, operation: Operation) -> Self {
        self.spec
            .paths
            .entry(path.into())
            .or_default()
            .insert(method, operation);
        self
    }

    /// Build the OpenAPI document
    pub fn build(self) -> OpenApiSpec {
        self.spec
    }
}

/// Builder for a single operation
#[derive(Debug, Clone, Default)]
pub struct OperationBuilder {
    operation: Operation,
}

impl OperationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.operation.summary = Some(summary.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.operation.description = Some(description.into());
        self
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation.operation_id = Some(id.into());
        self
    }

    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.operation.parameters.push(parameter);
        self
    }

    pub fn response(mut self, status: impl Into<String>, response: Response) -> Self {
        self.operation.responses.insert(status.into(), response);
        self
    }

    pub fn build(self) -> Operation {
        self.operation
    }
}

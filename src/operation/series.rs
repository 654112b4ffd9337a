//! Field configuration: one operation, a series of operations, or a constant.

use serde_yaml::Value as Yaml;

use super::execute::ExtractionOperation;
use super::value::Value;
use super::{OperationContext, OperationResult};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldConfig {
    Operation(ExtractionOperation),
    Series(Vec<ExtractionOperation>),
    Constant(Value),
}

impl FieldConfig {
    /// A mapping is one operation, a sequence is a series of operation
    /// mappings, and anything else is a constant value for the field.
    pub fn from_value(field: &str, config: &Yaml) -> OperationResult<Self> {
        match config {
            Yaml::Mapping(mapping) => Ok(FieldConfig::Operation(ExtractionOperation::from_mapping(
                field, mapping,
            )?)),
            Yaml::Sequence(operations) => operations
                .iter()
                .map(|operation| ExtractionOperation::from_value(field, operation))
                .collect::<OperationResult<Vec<_>>>()
                .map(FieldConfig::Series),
            constant => Ok(FieldConfig::Constant(Value::from_yaml(constant))),
        }
    }

    /// Extract the field from `target`, the page or an item element
    pub async fn execute(
        &self,
        target: Value,
        index: usize,
        ctx: &OperationContext<'_>,
    ) -> OperationResult<Value> {
        match self {
            FieldConfig::Operation(operation) => operation.execute(target, index, ctx).await,
            FieldConfig::Series(operations) => execute_series(operations, target, index, ctx).await,
            FieldConfig::Constant(value) => Ok(value.clone()),
        }
    }
}

/// Each step picks its targets by scope. A multiple step runs once over all
/// targets; otherwise it runs per target and the last result wins.
async fn execute_series(
    operations: &[ExtractionOperation],
    target: Value,
    index: usize,
    ctx: &OperationContext<'_>,
) -> OperationResult<Value> {
    let parent = target;
    let mut latest = parent.clone();
    let mut prior = parent.clone();

    for operation in operations {
        let targets = operation.select_targets(&latest, &prior, &parent);
        prior = latest.clone();
        if operation.is_multiple() {
            latest = operation.execute(Value::List(targets), index, ctx).await?;
        } else {
            for target in targets {
                latest = operation.execute(target, index, ctx).await?;
            }
        }
    }

    Ok(latest)
}

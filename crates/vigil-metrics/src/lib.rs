pub mod aggregator;
pub mod model;
pub mod query;
pub mod repository;
pub mod store;
pub mod validation;

pub use aggregator::{
    Aggregation, AggregationMethod, AggregationResult, Aggregator, GroupAggregate, GroupKey,
    GroupLabel, MetricAggregation,
};
pub use model::{DataType, MetricSample, MetricType, MetricValue};
pub use query::{MetricSeries, TagFilter, TagPredicate};
pub use repository::{InMemoryMetricRepository, MetricRepository};
pub use store::MetricStore;
pub use validation::{CustomRule, ValidationRule, Validator};

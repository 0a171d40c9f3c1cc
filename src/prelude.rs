pub use crate::data_structs::typedef::*;
pub use crate::data_structs::{
    AggregatedRecord,
    AggregatedTable,
    ParsedSampleId,
    SampleColumns,
    SampleTable,
    TissueCode,
    TissueEntry,
    TissueVocabulary,
};
pub use crate::error::{
    FlowError,
    ParseError,
};
pub use crate::io::{
    build_metric_sheet,
    read_delimited,
    write_csv,
    write_csv_file,
    DatasetLoader,
    DatasetValidator,
    LoadStats,
    LoadedDataset,
    LoaderConfig,
    ValidationConfig,
    ValidationReport,
};
pub use crate::parsing::{
    IdMatcher,
    LooseMatcher,
    MatchKind,
    SampleIdParser,
    StrictMatcher,
    TimeParser,
    TimeUnit,
};
pub use crate::tools::{
    auto_detect_config,
    detect_metric_columns,
    optimize_table,
    AggregationConfig,
    MappedReplicates,
    MetricAggregation,
    Pipeline,
    PipelineConfig,
    PipelineOutput,
    ReplicateKey,
    ReplicateMap,
    ReplicateMapper,
    VectorizedAggregator,
};

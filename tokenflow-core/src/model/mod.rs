mod execution;
mod multiple_event_aware;
mod process_metadata;
mod rule_data;

pub use execution::{Execution, ExecutionStatus};
pub use multiple_event_aware::MultipleEventAware;
pub use process_metadata::{ProcessMetaData, ProcessMetaDataCache};
pub use rule_data::{RuleData, RuleScope};

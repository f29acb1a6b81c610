use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const ID_COLUMN: &str = "id";
pub const TERM_COLUMN: &str = "term";
pub const DEFINITION_COLUMN: &str = "definition";

pub fn build_record_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new(ID_COLUMN, DataType::Int64, false),
		Field::new(TERM_COLUMN, DataType::Utf8, false),
		Field::new(DEFINITION_COLUMN, DataType::Utf8, false),
	]))
}

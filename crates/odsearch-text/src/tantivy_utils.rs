use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const ID_FIELD: &str = "id";
pub const TEXT_FIELD: &str = "text";
pub const ANALYZER: &str = "text_with_stopwords";

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field(ID_FIELD, STRING | STORED);
	let text_field_indexing = TextFieldIndexing::default()
		.set_tokenizer(ANALYZER)
		.set_index_option(IndexRecordOption::WithFreqsAndPositions);
	schema_builder.add_text_field(TEXT_FIELD, TextOptions::default().set_indexing_options(text_field_indexing));
	schema_builder.build()
}

/// Catalogue records mix English and German, so both stop lists apply.
pub fn register_tokenizer(index: &Index) {
	let stop_words = [
		"a","an","and","are","as","at","be","by","for","from","has","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","there","than","so","if","when","where","how","what","which","who","can","could","should","would","may","do","does","did","have","had",
		"der","die","das","und","oder","ein","eine","einer","eines","im","ist","sind","mit","von","vom","zu","zum","zur","den","dem","des","auf","aus","bei","für","über","nach","als","auch","wird","werden",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(ANALYZER, tokenizer);
}

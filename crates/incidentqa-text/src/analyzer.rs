use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};

pub const STOP_WORDS: &[&str] = &[
	"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

/// Lowercasing, stop-word removing tokenizer with word n-grams up to `ngram_max`.
#[derive(Clone)]
pub struct Analyzer {
	inner: TextAnalyzer,
	ngram_max: usize,
}

impl Analyzer {
	pub fn new(ngram_max: usize) -> Self {
		let inner = TextAnalyzer::builder(SimpleTokenizer::default())
			.filter(LowerCaser)
			.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
			.build();
		Self { inner, ngram_max: ngram_max.max(1) }
	}

	pub fn ngram_max(&self) -> usize { self.ngram_max }

	/// Unigram tokens in text order.
	pub fn tokens(&self, text: &str) -> Vec<String> {
		let mut analyzer = self.inner.clone();
		let mut stream = analyzer.token_stream(text);
		let mut out = Vec::new();
		while stream.advance() { out.push(stream.token().text.clone()); }
		out
	}

	/// Unigrams followed by space-joined n-grams up to `ngram_max`.
	pub fn terms(&self, text: &str) -> Vec<String> {
		let tokens = self.tokens(text);
		let mut terms = tokens.clone();
		for n in 2..=self.ngram_max {
			terms.extend(tokens.windows(n).map(|w| w.join(" ")));
		}
		terms
	}
}

impl Default for Analyzer {
	fn default() -> Self { Self::new(2) }
}

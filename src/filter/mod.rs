pub mod classifier;
pub mod pass;
pub mod state;
pub mod visibility;

pub use classifier::{Classification, Classifier, SignatureClassifier};
pub use pass::{run_pass, FilterContext, PassReport};
pub use state::FilterState;

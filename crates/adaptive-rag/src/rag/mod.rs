//! Graph nodes - routing, filter extraction, retrieval, evaluation, refinement, answers.

pub mod prompts;
pub mod quality;
pub mod query_filters;
pub mod query_refiner;
pub mod response;
pub mod retrieval;
pub mod router;
pub mod structured_output;

pub use quality::evaluate_retrieval_quality;
pub use query_filters::{extract_key_terms, extract_query_filters, filename_candidates, QueryFilterResult};
pub use query_refiner::refine_query;
pub use response::{canned_reply, direct_answer, generate_response, GENERATION_APOLOGY};
pub use retrieval::{merge_filters, retrieve_documents};
pub use router::{check_query_type, classify_by_rules};
pub use structured_output::extract_json_object;

//! Resolution pipeline - the core of the library.
//!
//! The pipeline turns a page snapshot into plan selectors:
//! - Container resolution (heuristics → model → pattern filtering)
//! - Pagination resolution (selector families → model verification/discovery)
//! - Plan synthesis and revision
//! - Plan validation against live pages
//!
//! Resolvers are stateless and safe to call concurrently. The completion
//! service is the only suspension point and is always bounded by a timeout.

pub mod container;
pub mod pagination;
pub mod prompts;
pub mod response;
pub mod synthesis;
pub mod validation;

pub use container::{absolutize_url, ContainerResolver};
pub use pagination::PaginationResolver;
pub use prompts::{
    format_container_prompt, format_pagination_discover_prompt, format_pagination_verify_prompt,
    CONTAINER_PROMPT, PAGINATION_DISCOVER_PROMPT, PAGINATION_VERIFY_PROMPT,
};
pub use response::{
    parse_model_response, request_analysis, ContainerSuggestion, ModelAnalysis,
    PaginationSuggestion, ResponseKind,
};
pub use synthesis::{
    PlanSynthesizer, SynthesisOptions, DEFAULT_CONTENT_LINK_SELECTOR, DEFAULT_LIST_SELECTOR,
};
pub use validation::validate_plan;

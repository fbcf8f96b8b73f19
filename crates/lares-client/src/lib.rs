pub mod fetch;
pub mod synthesis;

pub use fetch::FetchServiceClient;
pub use synthesis::SynthesisServiceClient;

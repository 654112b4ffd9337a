pub mod constants;
pub mod statistics;
pub mod time;
pub mod url_utils;

pub use constants::*;
pub use statistics::{HumanDwellTime, human_selection_shuffle, random_exponential_index};
pub use time::{GranularDateTime, Granularity, TimeError};
pub use url_utils::{clip_url, derive_domain, directory_components, normalize_url, resolve_url};

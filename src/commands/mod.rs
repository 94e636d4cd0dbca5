pub mod episodes;
pub mod status;

pub use episodes::{
    get_episode, ingest_episodes, load_episode_records, mark_episode_downloaded, IngestResult,
};
pub use status::{get_status_summary, StatusSummary};

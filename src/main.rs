use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod utils;

mod cache;
mod credentials;
mod error;
mod fetch;
mod ics;
mod schedule;

use cache::ScheduleCache;
use credentials::Prompt;
use fetch::{portal::PortalFetcher, Cancellation, RetryPolicy};

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Your portal username, asked if not given
    #[clap(value_parser)]
    user: Option<String>,

    /// Where the downloaded schedules are kept
    #[clap(long, value_name = "DIR", default_value = ".cache")]
    cache_dir: PathBuf,

    /// Download the schedule again, even if it's in the cache
    #[clap(short, long)]
    refresh: bool,

    /// Export to iCalendar format (.ics)
    #[clap(short, long, value_name = "FILE NAME")]
    export: Option<String>,

    /// Give up after this many attempts when the portal times out, default to never
    #[clap(long, value_name = "N")]
    max_attempts: Option<u32>,

    /// Wait before trying again after a timeout, doubled at each new timeout
    #[clap(long, value_name = "SECONDS", default_value_t = 0)]
    retry_delay: u64,

    /// Longest wait between two attempts
    #[clap(long, value_name = "SECONDS", default_value_t = 60)]
    max_delay: u64,

    /// How long the portal has to open a session
    #[clap(long, value_name = "SECONDS", default_value_t = 10)]
    timeout: u64,

    /// How long any later request of the session may take
    #[clap(long, value_name = "SECONDS", default_value_t = 60)]
    request_timeout: u64,

    /// Login page of the portal
    #[clap(long, value_name = "URL", default_value = fetch::portal::LOGIN_URL)]
    login_url: String,

    /// Page of the detailed schedule
    #[clap(long, value_name = "URL", default_value = fetch::portal::SCHEDULE_URL)]
    schedule_url: String,

    /// More logs (-v, -vv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[clap(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose, args.quiet);

    let mut prompt = Prompt {
        host: host(&args.login_url),
    };
    let user = match args.user {
        Some(user) => user,
        None => prompt.identity()?,
    };

    let cache = ScheduleCache::new(&args.cache_dir);
    if args.refresh && cache.evict(&user)? {
        info!("Cached schedule of {user} removed");
    }

    let policy = RetryPolicy {
        max_attempts: args.max_attempts,
        initial_delay: Duration::from_secs(args.retry_delay),
        max_delay: Duration::from_secs(args.max_delay),
    };

    // Ctrl-C stops the retries
    let cancel = Cancellation::default();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut fetcher = PortalFetcher {
        login_url: args.login_url,
        schedule_url: args.schedule_url,
        session_timeout: Duration::from_secs(args.timeout),
        request_timeout: Duration::from_secs(args.request_timeout),
        user_agent: format!("calport/{}", env!("CARGO_PKG_VERSION")),
    };

    let document =
        fetch::acquire(&cache, &user, &mut prompt, &mut fetcher, &policy, &cancel).await?;

    let courses = schedule::parse(&document).context("the cached schedule is unreadable")?;
    info!("{} courses found", courses.len());

    if let Some(mut filename) = args.export {
        ics::export(&courses, &mut filename)
            .with_context(|| format!("can't write {filename}"))?;

        println!("ICS file built and exported => {filename}");
    } else {
        schedule::display(&courses);
    }

    Ok(())
}

/// Host part of an URL, for the prompts
fn host(url: &str) -> String {
    url.split("://")
        .last()
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
        .to_owned()
}

fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("calport=info,warn"),
            1 => EnvFilter::new("calport=debug,info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_portal_urls() {
        assert_eq!(host("https://mywings.unf.edu/"), "mywings.unf.edu");
        assert_eq!(host("mywings.unf.edu"), "mywings.unf.edu");
    }

    #[test]
    fn default_arguments() {
        let args = Args::parse_from(["calport", "jdoe"]);
        assert_eq!(args.user.as_deref(), Some("jdoe"));
        assert_eq!(args.cache_dir, PathBuf::from(".cache"));
        assert_eq!(args.max_attempts, None);
        assert_eq!(args.retry_delay, 0);
        assert_eq!(args.request_timeout, 60);
        assert_eq!(args.login_url, fetch::portal::LOGIN_URL);
    }
}

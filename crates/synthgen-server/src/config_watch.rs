use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use notify::{Event, RecursiveMode, Watcher, recommended_watcher};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::loader;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watch the configuration file and re-apply `logging.level` when it changes.
///
/// Other settings are read once at startup; a changed value is reported and
/// takes effect on restart. Returns the thread keeping the watcher alive, or
/// `None` when the file does not exist.
pub fn start_config_watcher(path: PathBuf) -> Option<std::thread::JoinHandle<()>> {
    if !path.exists() {
        warn!("config file {:?} does not exist; watcher disabled", path);
        return None;
    }

    let handle = std::thread::spawn(move || {
        let last_reload = Arc::new(Mutex::new(Instant::now() - Duration::from_secs(1)));
        let lp = path.clone();
        let lr = last_reload.clone();

        let mut watcher = match recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(_event) => {
                    let mut last = lr.lock();
                    let now = Instant::now();
                    if now.duration_since(*last) < DEBOUNCE {
                        return;
                    }
                    *last = now;
                    match loader::load_config(lp.to_str()) {
                        Ok(new_cfg) => {
                            crate::observability::apply_logging_level(&new_cfg.logging.level);
                            info!(
                                level = %new_cfg.logging.level,
                                "configuration reloaded; logging level applied"
                            );
                        }
                        Err(e) => error!("configuration reload failed: {}", e),
                    }
                }
                Err(e) => error!("watch error: {}", e),
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                error!("failed to start config watcher: {}", e);
                return;
            }
        };

        if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
            error!("failed to watch config file: {}", e);
            return;
        }

        // Keep thread alive forever
        loop {
            std::thread::park();
        }
    });

    Some(handle)
}

//! Determines how many kernel file descriptors this process may safely
//! hold open, by probing the OS limit rather than trusting a hard-coded
//! guess (`spec.md` §4.5).

use std::os::unix::io::RawFd;

use crate::config::{Config, NUM_RESERVED_FDS};

/// Probes the descriptor ceiling by repeatedly `dup`-ing an already-open
/// fd (stdin) until it fails or `config.max_files_per_process` successes
/// have been reached, then derives the budget this layer may use.
///
/// Returns the computed `max_safe_fds`, or `None` if the probe leaves
/// fewer than [`crate::config::FD_MINFREE`] usable — the caller should
/// treat that as fatal, the way a server refuses to start without enough
/// descriptors to do useful work.
pub fn probe_max_safe_fds(config: &Config) -> Option<usize> {
    let mut held: Vec<RawFd> = Vec::new();
    let mut highest_fd: RawFd = -1;

    for _ in 0..config.max_files_per_process.max(1) {
        match crate::backend::local::dup(0) {
            Ok(fd) => {
                highest_fd = highest_fd.max(fd);
                held.push(fd);
            }
            Err(_) => break,
        }
    }

    let usable = held.len();
    for fd in held {
        let _ = crate::backend::local::close(fd);
    }

    // dup(2) hands back the lowest free descriptor, so the fds already
    // open before we started occupy the gap below our first acquired fd.
    let already_open = (highest_fd + 1) as usize - usable;
    let budget = usable.min(config.max_files_per_process.saturating_sub(already_open));
    let max_safe_fds = budget.saturating_sub(NUM_RESERVED_FDS);

    if max_safe_fds < crate::config::FD_MINFREE {
        None
    } else {
        Some(max_safe_fds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_yields_a_usable_budget_with_default_config() {
        let config = Config::default();
        let budget = probe_max_safe_fds(&config);
        assert!(budget.is_some());
        assert!(budget.unwrap() >= crate::config::FD_MINFREE);
    }

    #[test]
    fn tiny_process_limit_is_rejected() {
        let mut config = Config::default();
        config.max_files_per_process = 5;
        assert_eq!(probe_max_safe_fds(&config), None);
    }
}

//! Process-tree termination using sysinfo.
//!
//! The frame-server interpreter and some ffmpeg builds spawn helpers of their
//! own, so killing only the direct child can leave orphans running.

use log::{debug, warn};
use std::collections::HashMap;
use sysinfo::{Pid, System};

/// Descendants of `root`, deepest generation first. `root` is not included.
pub fn descendants(sys: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            if parent != *pid {
                children.entry(parent).or_default().push(*pid);
            }
        }
    }

    // Breadth-first by generation, then reversed so leaves come first
    let mut generations: Vec<Vec<Pid>> = Vec::new();
    let mut frontier = vec![root];
    let mut seen = vec![root];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for pid in &frontier {
            for child in children.get(pid).into_iter().flatten() {
                if !seen.contains(child) {
                    seen.push(*child);
                    next.push(*child);
                }
            }
        }
        if !next.is_empty() {
            generations.push(next.clone());
        }
        frontier = next;
    }

    generations.into_iter().rev().flatten().collect()
}

/// Kill `root_pid` and everything below it, children before parents
///
/// # Returns
/// The number of processes that accepted the kill signal
pub fn kill_tree(root_pid: u32) -> usize {
    let mut sys = System::new();
    sys.refresh_all();

    let root = Pid::from_u32(root_pid);
    let mut order = descendants(&sys, root);
    order.push(root);

    let mut killed = 0;
    for pid in order {
        match sys.process(pid) {
            Some(process) => {
                if process.kill() {
                    debug!("Killed process {}", pid);
                    killed += 1;
                } else {
                    warn!("Failed to kill process {}", pid);
                }
            }
            None => debug!("Process {} already gone", pid),
        }
    }
    killed
}

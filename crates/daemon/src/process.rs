//! OS process helpers built on sysinfo

use sysinfo::{Pid, ProcessesToUpdate, Signal, System};

/// Send SIGTERM to `pid`
///
/// Returns false if the process is gone or the platform cannot deliver the
/// signal; callers fall back to a hard kill.
pub fn send_terminate(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system
        .process(pid)
        .and_then(|process| process.kill_with(Signal::Term))
        .unwrap_or(false)
}

/// Send SIGKILL to `pid`; false if the process is already gone
pub fn send_kill(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    system
        .process(pid)
        .map(|process| process.kill())
        .unwrap_or(false)
}

/// PIDs of processes whose name contains `name` and whose argv contains
/// every entry of `required_args`
pub fn find_pids(name: &str, required_args: &[&str]) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All);

    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(_, process)| process.name().to_string_lossy().contains(name))
        .filter(|(_, process)| {
            required_args
                .iter()
                .all(|arg| process.cmd().iter().any(|c| c.to_string_lossy() == *arg))
        })
        .map(|(pid, _)| pid.as_u32())
        .collect();
    pids.sort_unstable();
    pids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_unknown_pid_is_false() {
        // PIDs near u32::MAX are never allocated
        assert!(!send_terminate(u32::MAX - 7));
        assert!(!send_kill(u32::MAX - 7));
    }

    #[test]
    fn test_find_pids_ignores_unknown_names() {
        assert!(find_pids("relaybox-no-such-process-name", &[]).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_running_child() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("sleep is available");

        assert!(send_terminate(child.id()));
        let status = child.wait().expect("child exits");
        assert!(!status.success());
    }
}

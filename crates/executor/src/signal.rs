//! Signal name parsing and process-group delivery.

/// A Unix signal, named the way DAG authors write it in step definitions
/// (`signal-on-stop: SIGINT`, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Int,
    Hup,
    Kill,
    Usr1,
    Usr2,
}

impl Signal {
    pub fn parse(name: &str) -> Option<Self> {
        let trimmed = name.trim().trim_start_matches("SIG").to_ascii_uppercase();
        match trimmed.as_str() {
            "TERM" => Some(Self::Term),
            "INT" => Some(Self::Int),
            "HUP" => Some(Self::Hup),
            "KILL" => Some(Self::Kill),
            "USR1" => Some(Self::Usr1),
            "USR2" => Some(Self::Usr2),
            _ => None,
        }
    }

    #[cfg(unix)]
    pub fn as_raw(self) -> libc::c_int {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Int => libc::SIGINT,
            Self::Hup => libc::SIGHUP,
            Self::Kill => libc::SIGKILL,
            Self::Usr1 => libc::SIGUSR1,
            Self::Usr2 => libc::SIGUSR2,
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::Term
    }
}

/// Deliver `sig` to the process group led by `pid`. Best-effort: a missing
/// process (already exited) is not an error.
#[cfg(unix)]
pub fn kill_process_group(pid: i32, sig: Signal) {
    // Negative pid targets the whole process group, which was created for
    // the child via `setsid()` in `pre_exec` — this reaches grandchildren
    // (e.g. a shell's own children) that a plain `kill(pid)` would miss.
    unsafe {
        libc::kill(-pid, sig.as_raw());
    }
}

#[cfg(not(unix))]
pub fn kill_process_group(_pid: i32, _sig: Signal) {
    // Process groups are a POSIX concept; non-Unix targets get no signal
    // fan-out and rely on the child's own exit.
}

//! SIGINT handling.
//!
//! A ^C reaches the whole process group, so running build scripts see it
//! too.  We survive the first one: the scripts die, their builds fail
//! without committing anything, and the failure unwinds through the engine
//! normally.  A second ^C kills us outright.

fn set_sigint_handler(handler: libc::sighandler_t) {
    // Safety: installing a signal handler is libc unsafe code.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler;
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

extern "C" fn on_first_sigint(_sig: libc::c_int) {
    // sigaction is async-signal-safe.
    set_sigint_handler(libc::SIG_DFL);
}

pub fn register_sigint() {
    set_sigint_handler(on_first_sigint as libc::sighandler_t);
}

//! SIGINT policy for the executor.
//!
//! The first interrupt is left to reach the running recipe subprocesses
//! (they share our process group), which fail their commands and let the
//! executor finish its bookkeeping and save the database.  The handler
//! then restores the default disposition, so a second interrupt kills
//! the controller itself.

extern "C" fn on_first_interrupt(_sig: libc::c_int) {
    // Safety: resetting a signal disposition is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}

pub fn install() {
    // Safety: registering a signal handler is libc unsafe code.
    unsafe {
        libc::signal(libc::SIGINT, on_first_interrupt as libc::sighandler_t);
    }
}

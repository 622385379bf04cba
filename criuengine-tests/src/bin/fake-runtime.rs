//! Plays the runtime in tests: runs the helper as its child and prints every
//! relay signal it receives afterwards.

use std::{
    mem::MaybeUninit,
    os::unix::process::ExitStatusExt,
    process::{self, Command},
    ptr,
    time::{Duration, Instant},
};

use clap::Parser;
use criuengine_common::{env, libc, nix::unistd::getpid, relay};

const AFTER_FIRST_RELAY: Duration = Duration::from_millis(300);

#[derive(Parser, Debug)]
struct Args {
    /// adopt orphaned descendants, so the helper cannot leave our tree
    #[arg(long)]
    subreaper: bool,

    /// export our pid as CRTOOLS_INIT_PID to the helper
    #[arg(long)]
    export_pid: bool,

    /// how long to wait for relay signals once the helper exited
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,

    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

fn main() {
    let args = Args::parse();

    let set = relay_set();
    unsafe {
        libc::sigprocmask(libc::SIG_BLOCK, &set, ptr::null_mut());
        if args.subreaper {
            libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1 as libc::c_ulong);
        }
    }

    let pid = getpid();
    println!("runtime pid: {pid}");

    let mut cmd = Command::new(&args.command[0]);
    cmd.args(&args.command[1..]);
    if args.export_pid {
        cmd.env(env::INIT_PID, pid.to_string());
    }
    let status = cmd.status().expect("failed to run helper");
    match status.code() {
        Some(code) => println!("helper exit: {code}"),
        None => println!("helper signal: {}", status.signal().unwrap_or_default()),
    }

    let mut deadline = Instant::now() + Duration::from_millis(args.wait_ms);
    let mut relayed = false;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        let timeout = libc::timespec {
            tv_sec: left.as_secs() as _,
            tv_nsec: left.subsec_nanos() as _,
        };
        let mut info = MaybeUninit::<libc::siginfo_t>::zeroed();
        let sig = unsafe { libc::sigtimedwait(&set, info.as_mut_ptr(), &timeout) };
        if sig == relay::signal_number() {
            let value = unsafe { info.assume_init_ref().si_value() };
            println!("relay: {}", relay::decode(value));
            if !relayed {
                relayed = true;
                deadline = deadline.min(Instant::now() + AFTER_FIRST_RELAY);
            }
        }
    }

    println!("done");
    process::exit(0);
}

fn relay_set() -> libc::sigset_t {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::zeroed();
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), relay::signal_number());
        set.assume_init()
    }
}

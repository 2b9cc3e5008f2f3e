//! Run a backup on a worker thread and follow it over a channel.
//!
//! Reads `IMAP_HOST`, `IMAP_USERNAME` and `IMAP_PASSWORD` from the environment (or `.env`)
//! and gives up after `IMAP_DEADLINE_SECS` seconds, if set.

use std::env;
use std::sync::mpsc::channel;
use std::thread;
use std::time::{Duration, Instant};

use imap_backup::{Backup, BackupOptions, ConnectionConfig, Credentials, Event};

fn main() {
    dotenvy::dotenv().ok();
    let host = env::var("IMAP_HOST").expect("IMAP_HOST");
    let username = env::var("IMAP_USERNAME").expect("IMAP_USERNAME");
    let password = env::var("IMAP_PASSWORD").expect("IMAP_PASSWORD");
    let deadline = env::var("IMAP_DEADLINE_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let backup = Backup::new(ConnectionConfig::new(host, 993), BackupOptions::default());
    let cancellation = backup.cancellation();
    let (mut tx, rx) = channel();
    let worker = thread::spawn(move || {
        backup.run(Credentials::new(username, password), "progress.tar.zst", &mut tx)
    });

    let mut messages = 0;
    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(Event::MailboxStarted { name, messages: n }) => println!("{} ({} messages)", name, n),
            Ok(Event::MessageArchived { .. }) => messages += 1,
            Ok(Event::MailboxSkipped { name, reason }) => println!("skipped {}: {}", name, reason),
            Ok(_) => {}
            Err(_) if worker.is_finished() => break,
            Err(_) => {}
        }
        if deadline.is_some_and(|d| Instant::now() > d) && !cancellation.is_cancelled() {
            println!("deadline reached, stopping");
            cancellation.cancel();
        }
    }

    match worker.join().expect("backup thread panicked") {
        Ok(summary) => println!("{} ({} messages seen here)", summary, messages),
        Err(e) => println!("backup failed: {}", e),
    }
}

//! Producer and processor threads
//!
//! Both threads keep only a weak reference on the engine while waiting. They stop once the last
//! [Esp] handle was dropped and their queues disconnect.
use crate::esp::{Esp, Shared};
use crate::msg::Msg;
use crate::sys::std_duration;
use crate::Error;
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use embassy_time::Instant;
use log::{debug, error};
use std::thread;

pub(crate) fn spawn(esp: &Esp) -> Result<(), Error> {
    let shared = Arc::downgrade(&esp.shared);
    let queue = esp.shared.producer.receiver();
    thread::Builder::new()
        .name("esp_producer".into())
        .spawn(move || produce(shared, queue))
        .map_err(|e| {
            error!("Spawning producer thread failed: {}", e);
            Error::Mem
        })?;

    let shared = Arc::downgrade(&esp.shared);
    let wake_ups = esp.shared.processor.receiver();
    thread::Builder::new()
        .name("esp_processor".into())
        .spawn(move || process(shared, wake_ups))
        .map_err(|e| {
            error!("Spawning processor thread failed: {}", e);
            Error::Mem
        })?;

    Ok(())
}

fn upgrade(shared: &Weak<Shared>) -> Option<Esp> {
    shared.upgrade().map(|shared| Esp { shared })
}

/// Sends one message after the other
fn produce(shared: Weak<Shared>, queue: Receiver<Box<Msg>>) {
    while let Ok(msg) = queue.recv() {
        let Some(esp) = upgrade(&shared) else {
            break;
        };
        run(&esp, msg);
    }
    debug!("Producer thread stopped");
}

/// Executes a message and hands it back to a blocking caller
fn run(esp: &Esp, msg: Box<Msg>) {
    if msg.delay.as_ticks() > 0 {
        thread::sleep(std_duration(msg.delay));
    }

    let sem_sync = &esp.shared.sem_sync;
    if sem_sync.wait(None).is_err() {
        return;
    }

    let block_time = msg.block_time;
    if esp.with_core(|core| core.start(msg)) {
        // Timeout is handled by finish()
        let _ = sem_sync.wait(Some(block_time));
    }

    let finished = esp.with_core(|core| core.finish());
    sem_sync.release();

    if let Some(mut msg) = finished {
        if let Some(done) = msg.done.take() {
            let _ = done.try_send(msg);
        }
    }
}

/// Decodes buffered input and runs timeouts
fn process(shared: Weak<Shared>, wake_ups: Receiver<()>) {
    loop {
        let Some(wait) = upgrade(&shared).map(|esp| esp.with_core(|core| core.timeouts.time_to_next(Instant::now())))
        else {
            break;
        };

        let received = match wait {
            Some(wait) => wake_ups.recv_timeout(std_duration(wait)),
            None => wake_ups.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        if received == Err(RecvTimeoutError::Disconnected) {
            break;
        }

        let Some(esp) = upgrade(&shared) else {
            break;
        };
        if received.is_ok() {
            esp.shared.sink.drain(&esp);
        }
        esp.process_timeouts();
    }
    debug!("Processor thread stopped");
}

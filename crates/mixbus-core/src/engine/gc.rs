//! RT-safe garbage collection for engine objects
//!
//! Channels, effects, impulse responses and input-bus tags are handed to the
//! audio thread wrapped in `basedrop::Owned<T>`. When the audio thread drops
//! one (a channel is removed, an effect replaced), the pointer is only
//! enqueued; the memory is released on the `audio-gc` thread where latency
//! doesn't matter.
//!
//! ## Usage
//!
//! ```ignore
//! use basedrop::Owned;
//! use crate::engine::gc_handle;
//!
//! let effect = Owned::new(&gc_handle(), BuiltinEffect::new(EffectKind::Reverb, 48000, 2));
//! // Dropped on any thread: deallocation is deferred to the GC thread
//! drop(effect);
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread frees queued allocations
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Global handle for creating `Owned<T>` / `Shared<T>` allocations
///
/// Initialized once; the Collector itself lives on a dedicated GC thread.
static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Initialize the global collector and return a handle
fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it is created on the thread that runs it
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::info!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn audio GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Get a handle for creating deferred-drop allocations
///
/// The first call starts the collector thread. The handle is cheap to clone.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

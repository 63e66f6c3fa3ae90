//! The single driver that advances every active Broadcaster on a fixed
//! interval. One tick loop for the whole process; Broadcasters never own a
//! timer themselves, mirroring the "do not spawn a timer per unit" rule
//! applied to the scheduler.

use std::sync::Arc;

use crate::broadcaster::BroadcasterHandle;
use crate::clock::{MonotonicClock, TickHandle};
use crate::config::Config;
use crate::model::ChannelId;
use crate::registry::Registry;

pub struct Controller {
    clock: MonotonicClock,
    config: Config,
    broadcasters: Registry<ChannelId, BroadcasterHandle>,
}

impl Controller {
    pub fn new(clock: MonotonicClock, config: Config) -> Arc<Self> {
        Arc::new(Controller {
            clock,
            config,
            broadcasters: Registry::new(),
        })
    }

    pub fn register(&self, channel_id: ChannelId, handle: BroadcasterHandle) {
        self.broadcasters.register(channel_id, handle);
    }

    pub fn unregister(&self, channel_id: &ChannelId) {
        self.broadcasters.unregister(channel_id);
    }

    /// Starts the tick loop. The returned [`TickHandle`] stops it when
    /// dropped.
    pub fn run(self: &Arc<Self>) -> TickHandle {
        let interval = self.config.tick_interval_us();
        let controller = self.clone();
        self.clock.schedule_tick(interval, move |now, interval| {
            let controller = controller.clone();
            async move {
                for channel_id in controller.broadcasters.keys() {
                    if let Some(handle) = controller.broadcasters.get(&channel_id) {
                        handle.emit(now, interval);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster;
    use crate::emitter::test_support::RecordingEmitter;
    use crate::events::EventBus;
    use crate::model::{Frame, SourceId};
    use crate::source_stream::test_support::VecSourceStream;
    use crate::source_stream::SourceStream;
    use std::collections::HashMap;
    use std::time::Duration;

    #[tokio::test]
    async fn tick_loop_drives_registered_broadcaster() {
        let clock = MonotonicClock::new();
        let mut config = Config::default();
        config.sample_rate = 1;
        config.frame_samples = 1;
        let controller = Controller::new(clock.clone(), config);
        let _tick_handle = controller.run();

        let frames = vec![
            Frame {
                source_id: SourceId::from("a"),
                bytes: vec![1, 2, 3, 4],
            };
            3
        ];
        let source: Box<dyn SourceStream> = Box::new(VecSourceStream::new(frames));
        let emitter = std::sync::Arc::new(RecordingEmitter::new());
        let mut receivers: HashMap<_, std::sync::Arc<dyn crate::emitter::Emitter>> =
            HashMap::new();
        receivers.insert(uuid::Uuid::new_v4(), emitter.clone());
        let channel_id = uuid::Uuid::new_v4();
        let (handle, _done) = broadcaster::spawn(
            source,
            receivers,
            config,
            clock.clone(),
            EventBus::new(),
            channel_id,
        );
        handle.start(clock.now(), 0, 0);
        controller.register(channel_id, handle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!emitter.sent.lock().unwrap().is_empty());
    }
}

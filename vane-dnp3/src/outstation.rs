//! Outstation role logic: serving reads, accepting writes, maintaining
//! internal indications and emitting unsolicited responses.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use vane_types::{PointId, PointValue, Stamp, Value};

use crate::app::{
    AppControl, Fragment, FunctionCode, Iin, Item, ItemPayload, ObjectHeader, PrefixCode, Range,
};
use crate::association::LinkEvent;
use crate::config::{PointConfig, RemoteConfig};
use crate::endpoint::{Connection, RemoteEndpoint};
use crate::error::AppError;
use crate::link::{is_broadcast, FrameCodec};
use crate::objects::{lookup, ObjectInstance};

const RECV_SLICE: Duration = Duration::from_millis(50);
const UNSOLICITED_RETRIES: u32 = 2;

/// State shared between the running outstation and its handle.
pub struct OutstationShared {
    store: RwLock<HashMap<PointId, Value>>,
    iin: AtomicU16,
    outgoing: Mutex<Vec<PointValue>>,
}

impl OutstationShared {
    fn new() -> Self {
        // A fresh outstation reports that it restarted.
        let iin = AtomicU16::new(Iin::DEVICE_RESTART.bits());
        Self {
            store: RwLock::new(HashMap::new()),
            iin,
            outgoing: Mutex::new(Vec::new()),
        }
    }

    /// Set a point's current value.
    pub fn set_value(&self, point: PointId, value: Value) {
        self.store.write().insert(point, value);
    }

    /// Read a point's current value.
    pub fn value(&self, point: PointId) -> Option<Value> {
        self.store.read().get(&point).cloned()
    }

    /// Queue a point value for unsolicited reporting.
    pub fn queue_unsolicited(&self, value: PointValue) {
        self.outgoing.lock().push(value);
    }

    /// Current internal indications.
    pub fn iin(&self) -> Iin {
        Iin::from_bits_truncate(self.iin.load(Ordering::SeqCst))
    }

    /// Raise indication bits.
    pub fn raise_iin(&self, bits: Iin) {
        self.iin.fetch_or(bits.bits(), Ordering::SeqCst);
    }

    /// Clear indication bits.
    pub fn clear_iin(&self, bits: Iin) {
        self.iin.fetch_and(!bits.bits(), Ordering::SeqCst);
    }
}

/// A pending unsolicited response awaiting its confirm.
struct PendingUnsolicited {
    fragment: Fragment,
    deadline: Instant,
    retries_left: u32,
}

/// DNP3 outstation over one association.
pub struct Outstation {
    connection: Box<dyn Connection>,
    codec: FrameCodec,
    endpoint: RemoteEndpoint,
    local: u16,
    remote: u16,
    points: Vec<PointConfig>,
    shared: Arc<OutstationShared>,
    updates: mpsc::Sender<PointValue>,
    unsolicited_enabled: bool,
    announced: bool,
    pending: Option<PendingUnsolicited>,
    time_offset_millis: i64,
    last_recorded: Option<Stamp>,
}

/// Control handle over a spawned outstation.
pub struct OutstationHandle {
    shared: Arc<OutstationShared>,
    stop: Arc<AtomicBool>,
    worker: thread::JoinHandle<()>,
    updates: mpsc::Receiver<PointValue>,
}

impl OutstationHandle {
    /// Shared point store and indications.
    pub fn shared(&self) -> &Arc<OutstationShared> {
        &self.shared
    }

    /// Wait for the next inbound point update.
    pub fn next_update(&self, timeout: Duration) -> Option<PointValue> {
        self.updates.recv_timeout(timeout).ok()
    }

    /// Stop the worker and wait for it.
    pub fn close(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.worker.join();
    }
}

impl Outstation {
    /// Outstation at link address `local` serving master `remote`.
    pub fn new(
        connection: Box<dyn Connection>,
        local: u16,
        remote: u16,
        config: RemoteConfig,
        points: Vec<PointConfig>,
    ) -> (Self, mpsc::Receiver<PointValue>) {
        let (updates, updates_rx) = mpsc::channel();
        let outstation = Self {
            connection,
            codec: FrameCodec::new(),
            endpoint: RemoteEndpoint::new(config, false),
            local,
            remote,
            points,
            shared: Arc::new(OutstationShared::new()),
            updates,
            unsolicited_enabled: true,
            announced: false,
            pending: None,
            time_offset_millis: 0,
            last_recorded: None,
        };
        (outstation, updates_rx)
    }

    /// The shared store and indications.
    pub fn shared(&self) -> Arc<OutstationShared> {
        Arc::clone(&self.shared)
    }

    /// Spawn the request-consumer worker.
    pub fn spawn(self) -> io::Result<OutstationHandle> {
        let shared = self.shared();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (relay_tx, relay_rx) = mpsc::channel();
        let mut outstation = self;
        let worker = thread::Builder::new()
            .name(format!("dnp3-outstation-{}", outstation.local))
            .spawn(move || {
                outstation.run(&stop_flag, Some(relay_tx));
            })?;
        Ok(OutstationHandle {
            shared,
            stop,
            worker,
            updates: relay_rx,
        })
    }

    /// Serve requests until the stop flag is raised.
    ///
    /// With `relay` set, inbound point updates are forwarded there as
    /// well as to the receiver returned by [`Self::new`].
    pub fn run(&mut self, stop: &AtomicBool, relay: Option<mpsc::Sender<PointValue>>) {
        while !stop.load(Ordering::Relaxed) {
            self.announce_restart();
            self.flush_unsolicited_queue();
            self.retry_pending();

            match self.connection.recv(RECV_SLICE) {
                Ok(Some(bytes)) => self.codec.push(&bytes),
                Ok(None) => continue,
                Err(error) => {
                    tracing::info!(%error, peer = %self.connection.peer(), "connection closed");
                    return;
                }
            }
            self.drain_frames(relay.as_ref());
        }
    }

    /// Announce the restart with an unsolicited null response, once.
    fn announce_restart(&mut self) {
        if self.announced || !self.unsolicited_enabled {
            return;
        }
        self.announced = true;
        self.send_unsolicited(Vec::new());
    }

    fn drain_frames(&mut self, relay: Option<&mpsc::Sender<PointValue>>) {
        loop {
            match self.codec.next_frame() {
                Ok(Some(frame)) => {
                    if frame.destination != self.local && !is_broadcast(frame.destination) {
                        tracing::debug!(
                            destination = frame.destination,
                            local = self.local,
                            "ignored frame for another station"
                        );
                        continue;
                    }
                    let remote = frame.source;
                    let event = self
                        .endpoint
                        .with_association(self.local, remote, |a| a.handle_link(&frame));
                    match event {
                        LinkEvent::Reply(reply) => self.send_frame(&reply),
                        LinkEvent::None => {}
                        LinkEvent::Segment(segment) => {
                            let completed = self
                                .endpoint
                                .with_association(self.local, remote, |a| {
                                    a.receive_segment(&segment)
                                });
                            match completed {
                                Ok(Some(bytes)) => self.handle_fragment_bytes(&bytes, relay),
                                Ok(None) => {}
                                Err(error) => {
                                    tracing::warn!(%error, "transport error, fragment dropped")
                                }
                            }
                        }
                    }
                }
                Ok(None) => return,
                Err(error) => tracing::warn!(%error, "dropped bad frame"),
            }
        }
    }

    fn handle_fragment_bytes(
        &mut self,
        bytes: &[u8],
        relay: Option<&mpsc::Sender<PointValue>>,
    ) {
        match Fragment::decode(bytes) {
            Ok(fragment) => {
                if let Some(response) = self.handle_fragment(fragment, relay) {
                    self.send_app_fragment(&response);
                }
            }
            Err(AppError::UnknownFunctionCode(code)) => {
                tracing::warn!(code, "unsupported function code");
                let control = AppControl::decode(bytes[0]);
                let response = Fragment::response(
                    control.sequence,
                    self.shared.iin() | Iin::NO_FUNC_CODE_SUPPORT,
                    Vec::new(),
                );
                self.send_app_fragment(&response);
            }
            Err(error) => tracing::warn!(%error, "dropped bad fragment"),
        }
    }

    fn handle_fragment(
        &mut self,
        fragment: Fragment,
        relay: Option<&mpsc::Sender<PointValue>>,
    ) -> Option<Fragment> {
        let sequence = fragment.control.sequence;
        match fragment.function {
            FunctionCode::Read => Some(self.serve_read(sequence, &fragment.items)),
            FunctionCode::Write => Some(self.serve_write(sequence, &fragment.items, relay)),
            FunctionCode::DirectOperate | FunctionCode::Operate => {
                Some(self.serve_write(sequence, &fragment.items, relay))
            }
            FunctionCode::DirectOperateNoResponse => {
                self.serve_write(sequence, &fragment.items, relay);
                None
            }
            FunctionCode::Confirm => {
                let confirmed = self
                    .endpoint
                    .with_association(self.local, self.remote, |a| a.take_confirm(sequence));
                if confirmed {
                    self.pending = None;
                } else {
                    tracing::debug!(sequence, "confirm matches no pending response");
                }
                None
            }
            FunctionCode::DisableUnsolicited => {
                self.unsolicited_enabled = false;
                Some(Fragment::response(sequence, self.shared.iin(), Vec::new()))
            }
            FunctionCode::EnableUnsolicited => {
                self.unsolicited_enabled = true;
                Some(Fragment::response(sequence, self.shared.iin(), Vec::new()))
            }
            FunctionCode::RecordCurrentTime => {
                self.last_recorded = Some(self.now());
                Some(Fragment::response(sequence, self.shared.iin(), Vec::new()))
            }
            other => {
                tracing::warn!(function = ?other, "function not served");
                Some(Fragment::response(
                    sequence,
                    self.shared.iin() | Iin::NO_FUNC_CODE_SUPPORT,
                    Vec::new(),
                ))
            }
        }
    }

    /// Serve a READ: one response item per request item.
    fn serve_read(&mut self, sequence: u8, items: &[Item]) -> Fragment {
        let mut iin = self.shared.iin();
        let mut out = Vec::new();
        for item in items {
            match self.read_one(item) {
                Some(response_item) => out.push(response_item),
                None => iin |= Iin::OBJECT_UNKNOWN,
            }
        }
        Fragment::response(sequence, iin, out)
    }

    fn read_one(&self, item: &Item) -> Option<Item> {
        let (start, stop) = match item.header.range {
            Range::StartStop { start, stop } | Range::Address { start, stop } => (start, stop),
            _ => return None,
        };
        let point = self
            .points
            .iter()
            .find(|p| p.point_type.read_group() == item.header.group && p.covers(start, stop))?;
        let value = self.shared.value(point.point)?;

        let (group, variation) = match point.variation {
            Some(variation) => (item.header.group, variation),
            None => point.point_type.default_variation(point.data_type),
        };
        lookup(group, variation)?;

        let count = (stop - start + 1) as usize;
        let values: Vec<Value> = match value {
            Value::Tuple(values) => {
                // A multi-index range requires a matching tuple.
                if values.len() != count {
                    return None;
                }
                values
            }
            single => vec![single; count],
        };

        let instances = values
            .into_iter()
            .map(|value| (None, ObjectInstance::with_value(value, Some(0x01))))
            .collect();
        Some(Item {
            header: ObjectHeader {
                group,
                variation,
                prefix: PrefixCode::None,
                range: Range::StartStop { start, stop },
            },
            payload: ItemPayload::Instances(instances),
        })
    }

    /// Serve a WRITE or operate: indications, time, or point updates.
    fn serve_write(
        &mut self,
        sequence: u8,
        items: &[Item],
        relay: Option<&mpsc::Sender<PointValue>>,
    ) -> Fragment {
        let mut iin = self.shared.iin();
        for item in items {
            if item.header.group == 80 {
                self.write_indications(item);
                iin = self.shared.iin();
                continue;
            }
            if matches!(item.header.group, 50 | 51) {
                if let ItemPayload::Instances(instances) = &item.payload {
                    if let Some(time) = instances.first().and_then(|(_, i)| i.time()) {
                        self.set_time(time);
                        iin = self.shared.iin();
                    }
                }
                continue;
            }
            match self.write_point(item, relay) {
                Ok(()) => {}
                Err(bits) => iin |= bits,
            }
        }
        Fragment::response(sequence, iin, Vec::new())
    }

    /// Apply a G80V1 packed write to the indication register.
    fn write_indications(&self, item: &Item) {
        let (start, packed) = match (&item.header.range, &item.payload) {
            (Range::StartStop { start, .. }, ItemPayload::Packed(packed)) => (*start, packed),
            _ => return,
        };
        for (offset, value) in packed.values().iter().enumerate() {
            let bit = start + offset as u32;
            if bit >= 16 {
                continue;
            }
            let flag = Iin::from_bits_truncate(1 << bit);
            if *value == 0 {
                self.shared.clear_iin(flag);
            } else {
                self.shared.raise_iin(flag);
            }
        }
    }

    /// Update the local clock from a time write.
    fn set_time(&mut self, written: Stamp) {
        self.time_offset_millis = written.unix_millis() - Stamp::now().unix_millis();
        self.shared.clear_iin(Iin::NEED_TIME);
        tracing::info!(offset_millis = self.time_offset_millis, "time synchronized");
    }

    /// The outstation's local time view.
    pub fn now(&self) -> Stamp {
        Stamp::from_unix_millis(Stamp::now().unix_millis() + self.time_offset_millis)
    }

    /// Apply a point write, publishing the inbound value.
    fn write_point(
        &mut self,
        item: &Item,
        relay: Option<&mpsc::Sender<PointValue>>,
    ) -> Result<(), Iin> {
        let instances = match &item.payload {
            ItemPayload::Instances(instances) => instances,
            _ => return Err(Iin::PARAMETER_ERROR),
        };
        let (start, stop) = bounds(item, instances);
        let point = self
            .points
            .iter()
            .find(|p| {
                p.point_type.command_group() == item.header.group && p.covers(start, stop)
            })
            .ok_or(Iin::OBJECT_UNKNOWN)?
            .clone();

        let mut values: Vec<Value> = instances
            .iter()
            .map(|(_, instance)| instance.value().cloned().unwrap_or(Value::Null))
            .collect();
        if item.header.group == 12 {
            // CROB control codes map back to booleans.
            for value in &mut values {
                *value = Value::Boolean(matches!(value, Value::Long(3)));
            }
        }
        let value = if values.len() == 1 {
            values.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Tuple(values)
        };

        self.shared.set_value(point.point, value.clone());
        let update = PointValue::new(point.point, self.now(), None, value);
        let _ = self.updates.send(update.clone());
        if let Some(relay) = relay {
            let _ = relay.send(update);
        }
        Ok(())
    }

    /// Send queued point values as one unsolicited response.
    fn flush_unsolicited_queue(&mut self) {
        if !self.unsolicited_enabled || self.pending.is_some() {
            return;
        }
        let queued: Vec<PointValue> = self.shared.outgoing.lock().drain(..).collect();
        if queued.is_empty() {
            return;
        }
        let items: Vec<Item> = queued
            .iter()
            .filter_map(|value| self.unsolicited_item(value))
            .collect();
        self.send_unsolicited(items);
    }

    fn unsolicited_item(&self, value: &PointValue) -> Option<Item> {
        let point = self.points.iter().find(|p| p.point == value.point())?;
        let (group, variation) = point.point_type.default_variation(point.data_type);
        lookup(group, variation)?;
        Some(Item {
            header: ObjectHeader {
                group,
                variation,
                prefix: PrefixCode::None,
                range: Range::StartStop {
                    start: point.start_index,
                    stop: point.start_index,
                },
            },
            payload: ItemPayload::Instances(vec![(
                None,
                ObjectInstance::with_value(value.value().clone(), Some(0x01)),
            )]),
        })
    }

    fn send_unsolicited(&mut self, items: Vec<Item>) {
        let sequence = self
            .endpoint
            .with_association(self.local, self.remote, |a| {
                let sequence = a.next_unsolicited();
                a.expect_confirm(sequence);
                sequence
            });
        let fragment = Fragment {
            control: AppControl::unsolicited(sequence),
            function: FunctionCode::UnsolicitedResponse,
            iin: Some(self.shared.iin()),
            items,
        };
        self.send_app_fragment(&fragment);
        self.pending = Some(PendingUnsolicited {
            fragment,
            deadline: Instant::now() + self.endpoint.config().reply_timeout,
            retries_left: UNSOLICITED_RETRIES,
        });
    }

    /// Resend an unconfirmed unsolicited response, bounded; then give up
    /// and raise the event-buffer-overflow indication.
    fn retry_pending(&mut self) {
        let Some(pending) = &mut self.pending else {
            return;
        };
        if Instant::now() < pending.deadline {
            return;
        }
        if pending.retries_left == 0 {
            tracing::warn!("unsolicited response was never confirmed");
            self.shared.raise_iin(Iin::EVENT_BUFFER_OVERFLOW);
            self.pending = None;
            return;
        }
        pending.retries_left -= 1;
        pending.deadline = Instant::now() + self.endpoint.config().reply_timeout;
        let fragment = pending.fragment.clone();
        self.send_app_fragment(&fragment);
    }

    fn send_app_fragment(&mut self, fragment: &Fragment) {
        let bytes = match fragment.encode() {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(%error, "failed to encode fragment");
                return;
            }
        };
        let frames = self
            .endpoint
            .with_association(self.local, self.remote, |a| a.send_fragment(&bytes));
        for frame in frames {
            self.send_frame(&frame);
        }
    }

    fn send_frame(&mut self, frame: &crate::link::Frame) {
        if let Err(error) = self.connection.send(&frame.encode()) {
            tracing::warn!(%error, "failed to send frame");
        }
    }
}

fn bounds(item: &Item, instances: &[(Option<u32>, ObjectInstance)]) -> (u32, u32) {
    match item.header.range {
        Range::StartStop { start, stop } | Range::Address { start, stop } => (start, stop),
        _ => {
            let indexes: Vec<u32> = instances.iter().filter_map(|(i, _)| *i).collect();
            let start = indexes.iter().copied().min().unwrap_or(0);
            let stop = indexes.iter().copied().max().unwrap_or(start);
            (start, stop)
        }
    }
}

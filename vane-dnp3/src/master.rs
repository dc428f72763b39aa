//! Master role logic: request building, batching and response handling.

use std::time::{Duration, Instant};

use vane_types::{PointValue, Stamp, Value};

use crate::app::{
    split_items, AppControl, Fragment, FunctionCode, Iin, Item, ItemPayload, ObjectHeader,
    PrefixCode, Range, DEVICE_RESTART_CODE,
};
use crate::association::LinkEvent;
use crate::config::{PointConfig, RemoteConfig};
use crate::endpoint::{Connection, RemoteEndpoint};
use crate::error::ServiceError;
use crate::link::{is_broadcast, FrameCodec};
use crate::objects::{ObjectInstance, PackedBits, PointType};

/// Callback invoked for each unsolicited point value.
pub type UnsolicitedListener = Box<dyn FnMut(PointValue) + Send>;

/// DNP3 master over one association.
pub struct Master {
    connection: Box<dyn Connection>,
    codec: FrameCodec,
    endpoint: RemoteEndpoint,
    local: u16,
    remote: u16,
    points: Vec<PointConfig>,
    read_batch: Vec<(PointConfig, Item)>,
    write_batch: Vec<Item>,
    listeners: Vec<UnsolicitedListener>,
    stashed_responses: Vec<Fragment>,
    unsolicited_supported: bool,
    handling_iin: bool,
    last_activity: Instant,
}

impl Master {
    /// Master talking to `remote` from link address `local`.
    pub fn new(
        connection: Box<dyn Connection>,
        local: u16,
        remote: u16,
        config: RemoteConfig,
    ) -> Self {
        Self {
            connection,
            codec: FrameCodec::new(),
            endpoint: RemoteEndpoint::new(config, true),
            local,
            remote,
            points: Vec::new(),
            read_batch: Vec::new(),
            write_batch: Vec::new(),
            listeners: Vec::new(),
            stashed_responses: Vec::new(),
            unsolicited_supported: true,
            handling_iin: false,
            last_activity: Instant::now(),
        }
    }

    /// Register a point binding, used to map unsolicited items back to
    /// point identities.
    pub fn add_point(&mut self, point: PointConfig) {
        self.points.push(point);
    }

    /// Register an unsolicited-value listener.
    pub fn on_unsolicited(&mut self, listener: UnsolicitedListener) {
        self.listeners.push(listener);
    }

    /// Whether the outstation accepted the unsolicited controls.
    pub const fn unsolicited_supported(&self) -> bool {
        self.unsolicited_supported
    }

    /// Open the session: disable unsolicited reporting for the three
    /// event classes and note whether the outstation supports it.
    pub fn connect(&mut self) -> Result<(), ServiceError> {
        let items = vec![
            Item::request(60, 2, Range::All),
            Item::request(60, 3, Range::All),
            Item::request(60, 4, Range::All),
        ];
        let response = self.transact(FunctionCode::DisableUnsolicited, items)?;
        if let Some(iin) = response.iin {
            if iin.contains(Iin::NO_FUNC_CODE_SUPPORT) {
                self.unsolicited_supported = false;
            }
        }
        Ok(())
    }

    /// Read one point and return its value.
    pub fn read_point(&mut self, point: &PointConfig) -> Result<PointValue, ServiceError> {
        let item = read_item(point);
        let response = self.transact(FunctionCode::Read, vec![item])?;
        let item = response
            .items
            .into_iter()
            .next()
            .ok_or(ServiceError::UnexpectedResponseItems)?;
        decode_point_value(point, &item)
    }

    /// Queue a read for the next [`Self::commit_read_requests`].
    pub fn request_point_value(&mut self, point: &PointConfig) {
        self.read_batch.push((point.clone(), read_item(point)));
    }

    /// Queue a write for the next [`Self::commit_update_requests`].
    pub fn request_point_update(
        &mut self,
        point: &PointConfig,
        value: &Value,
    ) -> Result<(), ServiceError> {
        self.write_batch.push(write_item(point, value)?);
        Ok(())
    }

    /// Send all queued reads, coalesced into as few fragments as the
    /// fragment size allows, and decode the responses in request order.
    pub fn commit_read_requests(&mut self) -> Result<Vec<PointValue>, ServiceError> {
        let batch = std::mem::take(&mut self.read_batch);
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let items: Vec<Item> = batch.iter().map(|(_, item)| item.clone()).collect();
        let response = self.transact(FunctionCode::Read, items)?;
        if response.items.len() != batch.len() {
            return Err(ServiceError::UnexpectedResponseItems);
        }
        batch
            .iter()
            .zip(response.items.iter())
            .map(|((point, _), item)| decode_point_value(point, item))
            .collect()
    }

    /// Send all queued writes in one WRITE transaction.
    pub fn commit_update_requests(&mut self) -> Result<(), ServiceError> {
        let items = std::mem::take(&mut self.write_batch);
        if items.is_empty() {
            return Ok(());
        }
        self.transact(FunctionCode::Write, items)?;
        Ok(())
    }

    /// Direct-operate one point to a value; the outstation publishes the
    /// update and returns a null response.
    pub fn direct_operate(
        &mut self,
        point: &PointConfig,
        value: &Value,
    ) -> Result<(), ServiceError> {
        let item = write_item(point, value)?;
        let response = self.transact(FunctionCode::DirectOperate, vec![item])?;
        if !response.items.is_empty() {
            return Err(ServiceError::UnexpectedResponseItems);
        }
        Ok(())
    }

    /// Wait up to `timeout` for unsolicited traffic and fan it out.
    ///
    /// Also probes the link with REQUEST_LINK_STATUS once the keep-alive
    /// interval passes without traffic.
    pub fn pump(&mut self, timeout: Duration) -> Result<(), ServiceError> {
        if self.last_activity.elapsed() >= self.endpoint.config().keep_alive {
            let probe = self
                .endpoint
                .with_association(self.local, self.remote, |a| a.link_status_request());
            self.connection
                .send(&probe.encode())
                .map_err(|e| ServiceError::ConnectionFailed(e.to_string()))?;
            self.last_activity = Instant::now();
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            match self.receive_fragment(remaining)? {
                None => return Ok(()),
                Some(fragment) => self.dispatch_unmatched(fragment)?,
            }
        }
    }

    /// One solicited transaction: send a request, await its response.
    fn transact(
        &mut self,
        function: FunctionCode,
        items: Vec<Item>,
    ) -> Result<Fragment, ServiceError> {
        let sequence = self
            .endpoint
            .with_association(self.local, self.remote, |a| a.next_solicited());
        let max = self.endpoint.config().max_fragment_size;
        let fragments = split_items(function, None, false, sequence, items, max)
            .map_err(|e| ServiceError::Refused(e.to_string()))?;
        for fragment in &fragments {
            self.send_fragment(fragment)?;
        }

        let deadline = Instant::now() + self.endpoint.config().reply_timeout;
        loop {
            // A nested transaction may already have stashed our response.
            if let Some(at) = self
                .stashed_responses
                .iter()
                .position(|f| f.control.sequence == sequence)
            {
                let fragment = self.stashed_responses.remove(at);
                if let Some(iin) = fragment.iin {
                    self.handle_iin(iin)?;
                }
                return Ok(fragment);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ServiceError::ReplyTimeout);
            }
            let Some(fragment) = self.receive_fragment(remaining)? else {
                return Err(ServiceError::ReplyTimeout);
            };
            match fragment.function {
                FunctionCode::Response if fragment.control.sequence == sequence => {
                    if let Some(iin) = fragment.iin {
                        self.handle_iin(iin)?;
                    }
                    return Ok(fragment);
                }
                _ => self.dispatch_unmatched(fragment)?,
            }
        }
    }

    /// Send one application fragment through the association.
    fn send_fragment(&mut self, fragment: &Fragment) -> Result<(), ServiceError> {
        let bytes = fragment
            .encode()
            .map_err(|e| ServiceError::Refused(e.to_string()))?;
        let frames = self
            .endpoint
            .with_association(self.local, self.remote, |a| a.send_fragment(&bytes));
        for frame in frames {
            self.connection
                .send(&frame.encode())
                .map_err(|e| ServiceError::ConnectionFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Pull connection bytes until one complete fragment arrives.
    fn receive_fragment(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Fragment>, ServiceError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Drain frames already buffered in the codec.
            loop {
                match self.codec.next_frame() {
                    Ok(Some(frame)) => {
                        if frame.destination != self.local && !is_broadcast(frame.destination) {
                            tracing::debug!(
                                destination = frame.destination,
                                "ignored frame for another station"
                            );
                            continue;
                        }
                        let event = self.endpoint.with_association(
                            self.local,
                            self.remote,
                            |a| a.handle_link(&frame),
                        );
                        match event {
                            LinkEvent::Segment(segment) => {
                                let done = self
                                    .endpoint
                                    .with_association(self.local, self.remote, |a| {
                                        a.receive_segment(&segment)
                                    });
                                match done {
                                    Ok(Some(bytes)) => match Fragment::decode(&bytes) {
                                        Ok(fragment) => {
                                            self.last_activity = Instant::now();
                                            return Ok(Some(fragment));
                                        }
                                        Err(error) => {
                                            tracing::warn!(%error, "dropped bad fragment")
                                        }
                                    },
                                    Ok(None) => {}
                                    Err(error) => {
                                        tracing::warn!(%error, "transport error, fragment dropped")
                                    }
                                }
                            }
                            LinkEvent::Reply(reply) => {
                                self.connection
                                    .send(&reply.encode())
                                    .map_err(|e| ServiceError::ConnectionFailed(e.to_string()))?;
                            }
                            LinkEvent::None => {}
                        }
                    }
                    Ok(None) => break,
                    Err(error) => tracing::warn!(%error, "dropped bad frame"),
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.connection.recv(remaining) {
                Ok(Some(bytes)) => self.codec.push(&bytes),
                Ok(None) => return Ok(None),
                Err(e) => return Err(ServiceError::ConnectionFailed(e.to_string())),
            }
        }
    }

    /// Handle fragments that are not the awaited solicited response.
    fn dispatch_unmatched(&mut self, fragment: Fragment) -> Result<(), ServiceError> {
        match fragment.function {
            FunctionCode::UnsolicitedResponse => self.handle_unsolicited(fragment),
            FunctionCode::Response => {
                // A response for an enclosing transaction; keep it.
                self.stashed_responses.push(fragment);
                Ok(())
            }
            other => {
                tracing::debug!(function = ?other, "ignored fragment");
                Ok(())
            }
        }
    }

    /// Confirm an unsolicited response and fan its items out.
    fn handle_unsolicited(&mut self, fragment: Fragment) -> Result<(), ServiceError> {
        let confirm = Fragment {
            control: AppControl {
                fir: true,
                fin: true,
                con: false,
                uns: true,
                sequence: fragment.control.sequence,
            },
            function: FunctionCode::Confirm,
            iin: None,
            items: Vec::new(),
        };
        self.send_fragment(&confirm)?;

        if let Some(iin) = fragment.iin {
            self.handle_iin(iin)?;
        }

        for item in &fragment.items {
            let Some(point) = self.point_for(item).cloned() else {
                tracing::debug!(
                    group = item.header.group,
                    "unsolicited item matches no configured point"
                );
                continue;
            };
            let value = decode_point_value(&point, item)?;
            for listener in &mut self.listeners {
                listener(value.clone());
            }
        }
        Ok(())
    }

    /// React to response indications: clear device restart, serve
    /// need-time.
    fn handle_iin(&mut self, iin: Iin) -> Result<(), ServiceError> {
        if self.handling_iin {
            return Ok(());
        }
        self.handling_iin = true;
        let result = self.handle_iin_inner(iin);
        self.handling_iin = false;
        result
    }

    fn handle_iin_inner(&mut self, iin: Iin) -> Result<(), ServiceError> {
        if iin.contains(Iin::DEVICE_RESTART) {
            tracing::info!("clearing device-restart indication");
            let item = Item {
                header: ObjectHeader {
                    group: 80,
                    variation: 1,
                    prefix: PrefixCode::None,
                    range: Range::StartStop {
                        start: DEVICE_RESTART_CODE,
                        stop: DEVICE_RESTART_CODE,
                    },
                },
                payload: ItemPayload::Packed(PackedBits::new(1, vec![0])),
            };
            self.transact(FunctionCode::Write, vec![item])?;
        }
        if iin.contains(Iin::NEED_TIME) {
            tracing::info!("serving need-time indication");
            self.transact(FunctionCode::RecordCurrentTime, Vec::new())?;
            let recorded = Stamp::now();
            let item = Item {
                header: ObjectHeader {
                    group: 50,
                    variation: 3,
                    prefix: PrefixCode::None,
                    range: Range::Count(1),
                },
                payload: ItemPayload::Instances(vec![(
                    None,
                    ObjectInstance::with_time(recorded),
                )]),
            };
            self.transact(FunctionCode::Write, vec![item])?;
        }
        Ok(())
    }

    /// Find the configured point an inbound item belongs to.
    fn point_for(&self, item: &Item) -> Option<&PointConfig> {
        let (start, stop) = match item.header.range {
            Range::StartStop { start, stop } | Range::Address { start, stop } => (start, stop),
            _ => return None,
        };
        self.points.iter().find(|p| {
            (p.point_type.read_group() == item.header.group
                || event_group(p.point_type) == Some(item.header.group))
                && p.covers(start, stop)
        })
    }
}

/// Event group reported for a point type, when distinct from the static
/// group.
const fn event_group(point_type: PointType) -> Option<u8> {
    match point_type {
        PointType::SingleBitInput => Some(2),
        PointType::Counter => Some(22),
        PointType::AnalogInput => Some(32),
        PointType::AnalogOutput => Some(42),
        _ => None,
    }
}

/// The READ item for a configured point.
fn read_item(point: &PointConfig) -> Item {
    Item::request(
        point.point_type.read_group(),
        0,
        Range::StartStop {
            start: point.start_index,
            stop: point.stop_index,
        },
    )
}

/// The WRITE/DIRECT_OPERATE item carrying a value for a point.
fn write_item(point: &PointConfig, value: &Value) -> Result<Item, ServiceError> {
    let group = point.point_type.command_group();
    let variation = point.variation.unwrap_or_else(|| {
        if group == 12 {
            1
        } else if group == 41 {
            match point.data_type {
                vane_types::DataType::Int16 => 2,
                vane_types::DataType::Float32 => 3,
                vane_types::DataType::Float64 => 4,
                _ => 1,
            }
        } else {
            point.point_type.default_variation(point.data_type).1
        }
    });

    let count = point.index_count();
    let values: Vec<Value> = match value {
        Value::Tuple(values) if count > 1 => {
            if values.len() != count {
                return Err(ServiceError::Refused(format!(
                    "tuple size {} does not match range length {count}",
                    values.len()
                )));
            }
            values.clone()
        }
        other => vec![other.clone(); count],
    };

    let instances = values
        .into_iter()
        .enumerate()
        .map(|(at, value)| {
            let instance = if group == 12 {
                // Latch on / latch off control codes.
                let on = matches!(value, Value::Boolean(true) | Value::Long(1));
                ObjectInstance::command(Value::Long(if on { 3 } else { 4 }), 0)
            } else {
                ObjectInstance::command(value, 0)
            };
            (Some(point.start_index + at as u32), instance)
        })
        .collect();

    Ok(Item {
        header: ObjectHeader {
            group,
            variation,
            prefix: PrefixCode::IndexShort,
            range: Range::Count(count as u32),
        },
        payload: ItemPayload::Instances(instances),
    })
}

/// Decode one response item into a point value for a configured point.
fn decode_point_value(point: &PointConfig, item: &Item) -> Result<PointValue, ServiceError> {
    let values: Vec<Value> = match &item.payload {
        ItemPayload::Instances(instances) => instances
            .iter()
            .map(|(_, instance)| instance.value().cloned().unwrap_or(Value::Null))
            .collect(),
        ItemPayload::Packed(packed) => packed
            .values()
            .iter()
            .map(|v| {
                if item.header.group == 3 {
                    Value::Long(*v as i64)
                } else {
                    Value::Boolean(*v != 0)
                }
            })
            .collect(),
        ItemPayload::None => Vec::new(),
    };

    let value = match values.len() {
        0 => return Err(ServiceError::UnexpectedResponseItems),
        1 => values.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Tuple(values),
    };

    let stamp = match &item.payload {
        ItemPayload::Instances(instances) => instances
            .first()
            .and_then(|(_, instance)| instance.time())
            .unwrap_or_else(Stamp::now),
        _ => Stamp::now(),
    };

    Ok(PointValue::new(point.point, stamp, None, value))
}

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};

use crate::address::AddressBase;
use crate::error::{self, Error, Result, XmlBlasterError};
use crate::qos::{ConnectQosData, ConnectReturnQos, DisconnectQosData, QueryQosData, StatusQosData};
use crate::queue::{ClientQueue, Invocation, QueueEntry, Rejected};
use crate::queue_property::QueueProperty;
use crate::types::{state_info, MsgUnit, MsgUnitRaw, Priority, Relating};

use super::{ConnectionState, Listener, ServerInstance, Transport};

/// Identity of the server session we are connected to
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServerSession {
    secret_session_id: Option<String>,
    instance_id: Option<String>,
}

struct Inner {
    name: String,
    transport: Arc<dyn Transport>,
    listener: Arc<dyn Listener>,
    address: AddressBase,
    queue: ClientQueue,
    state: RwLock<ConnectionState>,
    connect_qos: Mutex<Option<ConnectQosData>>,
    server: Mutex<Option<ServerSession>>,
    //serializes direct sends and queue flushes
    send_lock: tokio::sync::Mutex<()>,
    retry_counter: AtomicI64,
    wakeup_tx: Mutex<mpsc::Sender<()>>,
}

/// Client side connection with fail-safe queueing.
///
/// A background task pings the server while alive and polls for it while the connection
/// is lost. Must be created inside a tokio runtime.
pub struct ConnectionsHandler {
    inner: Arc<Inner>,
}

impl Drop for ConnectionsHandler {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl ConnectionsHandler {
    /// Address and client queue limits are taken from the first client queue of `qos`.
    pub fn new(qos: &ConnectQosData, transport: Arc<dyn Transport>, listener: Arc<dyn Listener>) -> Self {
        let address = qos.address().cloned().unwrap_or_else(AddressBase::client);
        let queue = match qos.client_queue() {
            Some(q) => ClientQueue::with_property(q),
            None => ClientQueue::with_property(&QueueProperty::new(Relating::Client)),
        };
        let name = qos.session_name().map(|n| n.to_string()).unwrap_or_else(|| "client".into());
        log::debug!(
            "{} pingInterval={} retries={} delay={} queue maxEntries={} maxBytes={}",
            name,
            address.ping_interval(),
            address.retries(),
            address.delay(),
            queue.max_entries(),
            queue.max_bytes()
        );

        let (wakeup_tx, wakeup_rx) = mpsc::channel::<()>(8);
        let inner = Arc::new(Inner {
            name,
            transport,
            listener,
            address,
            queue,
            state: RwLock::new(ConnectionState::Undef),
            connect_qos: Mutex::new(None),
            server: Mutex::new(None),
            send_lock: tokio::sync::Mutex::new(()),
            retry_counter: AtomicI64::new(0),
            wakeup_tx: Mutex::new(wakeup_tx),
        });
        tokio::spawn(inner.clone().run(wakeup_rx));
        Self { inner }
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.state() == ConnectionState::Alive
    }

    #[inline]
    pub fn is_polling(&self) -> bool {
        self.state() == ConnectionState::Polling
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.state() == ConnectionState::Dead
    }

    #[inline]
    pub fn address(&self) -> &AddressBase {
        &self.inner.address
    }

    /// Entries waiting for the server
    #[inline]
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// The secret session id of the last successful connect
    pub fn secret_session_id(&self) -> Option<String> {
        self.inner.server.lock().as_ref().and_then(|s| s.secret_session_id.clone())
    }

    /// Logs in. If the server is unreachable, fail-safe mode is configured and the session name
    /// carries a positive public session id, the connect is queued and a provisional return QoS
    /// with state info `QUEUED` is handed back.
    pub async fn connect(&self, mut qos: ConnectQosData) -> Result<ConnectReturnQos> {
        match self.state() {
            ConnectionState::Undef => {}
            ConnectionState::Dead => return Err(self.inner.dead_error("connect")),
            state => {
                return Err(XmlBlasterError::IllegalState(format!(
                    "{} is already connected, state is {}",
                    self.inner.name, state
                ))
                .into())
            }
        }

        let xml = qos.to_xml();
        *self.inner.connect_qos.lock() = Some(qos.clone());
        let _guard = self.inner.send_lock.lock().await;
        match self.inner.transport.connect(&xml).await {
            Ok(ret) => {
                let ret = ConnectReturnQos::read_object(&ret)?;
                let server = self.inner.remember(&ret);
                if let Some(old) = self.inner.transition(&[ConnectionState::Undef], ConnectionState::Alive) {
                    log::info!("{} connected, state {} -> {}", self.inner.name, old, ConnectionState::Alive);
                    self.inner.listener.reached_alive(old, server);
                    self.inner.wakeup();
                }
                Ok(ret)
            }
            Err(e)
                if error::is_communication(&e)
                    && self.inner.is_fail_safe()
                    && qos.session_name().map(|n| n.is_pub_session_id_user()).unwrap_or(false) =>
            {
                log::warn!("{} connect failed, {}, polling for the server", self.inner.name, e);
                self.inner.polling(&[ConnectionState::Undef]);
                qos.set_state_info(state_info::QUEUED);
                Ok(qos)
            }
            Err(e) => Err(e),
        }
    }

    /// Publishes `msg`, queued while polling for the server.
    pub async fn publish(&self, msg: MsgUnit) -> Result<StatusQosData> {
        let priority = msg.qos.priority();
        let raw = msg.to_raw();
        let _guard = self.inner.send_lock.lock().await;
        match self.state() {
            ConnectionState::Alive => match self.inner.transport.publish(&raw).await {
                Ok(ret) => StatusQosData::read_object(&ret),
                Err(e) if error::is_communication(&e) => {
                    self.inner.lost(&e);
                    self.inner.enqueue(priority, Invocation::Publish(raw), StatusQosData::new())
                }
                Err(e) => Err(e),
            },
            ConnectionState::Polling => {
                self.inner.enqueue(priority, Invocation::Publish(raw), StatusQosData::new())
            }
            _ => Err(self.inner.not_alive_error("publish")),
        }
    }

    /// Subscribes, queued while polling for the server. A queued subscription
    /// without id gets a client side generated one.
    pub async fn subscribe(&self, key: &str, mut qos: QueryQosData) -> Result<StatusQosData> {
        let _guard = self.inner.send_lock.lock().await;
        match self.state() {
            ConnectionState::Alive => match self.inner.transport.subscribe(key, &qos.to_xml()).await {
                Ok(ret) => return StatusQosData::read_object(&ret),
                Err(e) if error::is_communication(&e) => self.inner.lost(&e),
                Err(e) => return Err(e),
            },
            ConnectionState::Polling => {}
            _ => return Err(self.inner.not_alive_error("subscribe")),
        }

        let id = match qos.subscription_id() {
            Some(id) => id.to_owned(),
            None => {
                let id = QueryQosData::generate_subscription_id();
                qos.set_subscription_id(id.clone());
                id
            }
        };
        let invocation = Invocation::Subscribe { key: key.to_owned(), qos: qos.to_xml() };
        self.inner.enqueue(Priority::NORM, invocation, StatusQosData::subscribed(id))
    }

    /// Never queued, fails with `communication.noConnection.polling` while polling.
    pub async fn unsubscribe(&self, key: &str, qos: QueryQosData) -> Result<Vec<StatusQosData>> {
        self.inner.check_alive("unsubscribe")?;
        let rets = self.inner.call(self.inner.transport.unsubscribe(key, &qos.to_xml())).await?;
        rets.iter().map(|r| StatusQosData::read_object(r)).collect()
    }

    /// Never queued, fails with `communication.noConnection.polling` while polling.
    pub async fn get(&self, key: &str, qos: QueryQosData) -> Result<Vec<MsgUnit>> {
        self.inner.check_alive("get")?;
        let msgs = self.inner.call(self.inner.transport.get(key, &qos.to_xml())).await?;
        msgs.iter().map(MsgUnit::from_raw).collect()
    }

    /// Never queued, fails with `communication.noConnection.polling` while polling.
    pub async fn erase(&self, key: &str, qos: QueryQosData) -> Result<Vec<StatusQosData>> {
        self.inner.check_alive("erase")?;
        let rets = self.inner.call(self.inner.transport.erase(key, &qos.to_xml())).await?;
        rets.iter().map(|r| StatusQosData::read_object(r)).collect()
    }

    /// Logs out and stops all retries, the handler is dead afterwards.
    /// Returns false if it was dead already.
    pub async fn disconnect(&self, qos: DisconnectQosData) -> Result<bool> {
        let old = {
            let mut state = self.inner.state.write();
            let old = *state;
            *state = ConnectionState::Dead;
            old
        };
        if old == ConnectionState::Dead {
            return Ok(false);
        }
        self.inner.close();

        let _guard = self.inner.send_lock.lock().await;
        let reason = XmlBlasterError::Dead(format!("{} is disconnected", self.inner.name));
        let pending = self.inner.queue.take_all();
        if qos.clear_client_queue() {
            if !pending.is_empty() {
                log::info!("{} discarding {} queued entries", self.inner.name, pending.len());
            }
        } else {
            for entry in &pending {
                self.inner.listener.dead_message(entry, &reason);
            }
        }
        if old == ConnectionState::Alive {
            if let Err(e) = self.inner.transport.disconnect(&qos.to_xml()).await {
                log::warn!("{} disconnect failed, {}", self.inner.name, e);
            }
        }
        if let Err(e) = self.inner.transport.shutdown().await {
            log::warn!("{} transport shutdown failed, {}", self.inner.name, e);
        }
        log::info!("{} disconnected, state {} -> {}", self.inner.name, old, ConnectionState::Dead);
        self.inner.listener.reached_dead(old, &reason);
        Ok(true)
    }
}

impl Inner {
    #[inline]
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    #[inline]
    fn is_fail_safe(&self) -> bool {
        self.address.is_fail_safe() && self.address.retries() != 0
    }

    /// Switches to `to` if the current state is one of `from`, returns the old state.
    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> Option<ConnectionState> {
        let mut state = self.state.write();
        let old = *state;
        if !from.contains(&old) {
            return None;
        }
        *state = to;
        Some(old)
    }

    fn wakeup(&self) {
        if let Err(e) = self.wakeup_tx.lock().try_send(()) {
            log::debug!("{} wakeup not sent, {:?}", self.name, e);
        }
    }

    /// Ends the background task
    #[inline]
    fn close(&self) {
        self.wakeup_tx.lock().close_channel();
    }

    fn polling(&self, from: &[ConnectionState]) {
        if let Some(old) = self.transition(from, ConnectionState::Polling) {
            self.retry_counter.store(0, Ordering::SeqCst);
            log::warn!(
                "{} state {} -> {}, retrying every {} ms",
                self.name,
                old,
                ConnectionState::Polling,
                self.address.delay()
            );
            self.listener.reached_polling(old);
            self.wakeup();
        }
    }

    fn die(&self, reason: XmlBlasterError) {
        let from = [ConnectionState::Undef, ConnectionState::Alive, ConnectionState::Polling];
        if let Some(old) = self.transition(&from, ConnectionState::Dead) {
            log::error!("{} state {} -> {}, {}", self.name, old, ConnectionState::Dead, reason);
            self.listener.reached_dead(old, &reason);
            for entry in self.queue.take_all() {
                self.listener.dead_message(&entry, &reason);
            }
            self.close();
        }
    }

    /// The connection broke while alive.
    fn lost(&self, e: &Error) {
        if self.is_fail_safe() {
            self.polling(&[ConnectionState::Alive]);
        } else {
            self.die(XmlBlasterError::Dead(format!("{} lost the connection, fail-safe mode is off: {}", self.name, e)));
        }
    }

    fn dead_error(&self, method: &str) -> Error {
        XmlBlasterError::Dead(format!("{} is dead, {} is not possible", self.name, method)).into()
    }

    fn not_alive_error(&self, method: &str) -> Error {
        match self.state() {
            ConnectionState::Undef => {
                XmlBlasterError::NoConnection(format!("{} is not connected, {} is not possible", self.name, method))
                    .into()
            }
            ConnectionState::Polling => XmlBlasterError::Polling(format!(
                "{} is polling for the server, {} is not possible",
                self.name, method
            ))
            .into(),
            _ => self.dead_error(method),
        }
    }

    fn check_alive(&self, method: &str) -> Result<()> {
        if self.state() == ConnectionState::Alive {
            Ok(())
        } else {
            Err(self.not_alive_error(method))
        }
    }

    /// Awaits a direct transport call, a communication failure starts polling.
    async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let res = fut.await;
        if let Err(e) = &res {
            if error::is_communication(e) {
                self.lost(e);
            }
        }
        res
    }

    fn enqueue(&self, priority: Priority, invocation: Invocation, mut ret: StatusQosData) -> Result<StatusQosData> {
        if self.state() != ConnectionState::Polling {
            return Err(self.not_alive_error(invocation.method().as_str()));
        }
        match self.queue.push(QueueEntry::new(priority, invocation)) {
            Ok(()) => {
                ret.set_state_info(state_info::QUEUED);
                ret.touch_rcv_timestamp();
                Ok(ret)
            }
            Err(Rejected { entry, reason }) => {
                log::warn!("{} {}", self.name, reason);
                self.listener.dead_message(&entry, &reason);
                Err(reason.into())
            }
        }
    }

    /// Stores the server identity and tells whether it changed.
    fn remember(&self, ret: &ConnectReturnQos) -> ServerInstance {
        let session = ServerSession {
            secret_session_id: ret.secret_session_id().map(|s| s.to_owned()),
            instance_id: ret.instance_id().map(|s| s.to_owned()),
        };
        if let Some(id) = &session.secret_session_id {
            if let Some(qos) = self.connect_qos.lock().as_mut() {
                qos.set_secret_session_id(id.clone());
            }
        }
        let mut server = self.server.lock();
        let instance = match server.as_ref() {
            None => ServerInstance::Initial,
            Some(prev) if *prev == session => ServerInstance::Same,
            Some(_) => ServerInstance::New,
        };
        *server = Some(session);
        instance
    }

    async fn run(self: Arc<Self>, mut wakeup_rx: mpsc::Receiver<()>) {
        loop {
            let state = self.state();
            if state == ConnectionState::Dead {
                break;
            }
            let ping_interval = self.address.ping_interval();
            let timer = async {
                match state {
                    ConnectionState::Alive if ping_interval > 0 => {
                        tokio::time::sleep(Duration::from_millis(ping_interval as u64)).await;
                        self.ping().await;
                    }
                    ConnectionState::Polling => {
                        tokio::time::sleep(Duration::from_millis(self.address.delay() as u64)).await;
                        self.reconnect().await;
                    }
                    _ => futures::future::pending::<()>().await,
                }
            };
            tokio::select! {
                wakeup = wakeup_rx.next() => {
                    if wakeup.is_none() {
                        break;
                    }
                }
                _ = timer => {}
            }
        }
        log::debug!("{} dispatcher task exit, state is {}", self.name, self.state());
    }

    async fn ping(&self) {
        match self.transport.ping("<qos/>").await {
            Ok(_) => log::trace!("{} ping ok", self.name),
            Err(e) if error::is_communication(&e) => {
                log::warn!("{} ping failed, {}", self.name, e);
                self.lost(&e);
            }
            Err(e) => log::warn!("{} ping failed, {}", self.name, e),
        }
    }

    async fn reconnect(&self) {
        let qos = match self.connect_qos.lock().as_ref() {
            Some(qos) => qos.to_xml(),
            None => return,
        };
        let _guard = self.send_lock.lock().await;
        if self.state() != ConnectionState::Polling {
            return;
        }
        let res = async {
            let ret = self.transport.connect(&qos).await?;
            let ret = ConnectReturnQos::read_object(&ret)?;
            let server = self.remember(&ret);
            if server == ServerInstance::New {
                log::warn!("{} reconnected to a new server instance, subscriptions are lost", self.name);
            }
            self.flush().await?;
            Ok::<_, Error>(server)
        }
        .await;

        match res {
            Ok(server) => {
                if let Some(old) = self.transition(&[ConnectionState::Polling], ConnectionState::Alive) {
                    log::info!("{} reconnected, state {} -> {}", self.name, old, ConnectionState::Alive);
                    self.retry_counter.store(0, Ordering::SeqCst);
                    self.listener.reached_alive(old, server);
                }
            }
            Err(e) => {
                let attempts = self.retry_counter.fetch_add(1, Ordering::SeqCst) + 1;
                let retries = self.address.retries();
                if retries >= 0 && attempts >= retries as i64 {
                    self.die(XmlBlasterError::Dead(format!(
                        "{} gave up after {} reconnect attempts, {}",
                        self.name, attempts, e
                    )));
                } else {
                    log::debug!("{} reconnect attempt {} failed, {}", self.name, attempts, e);
                }
            }
        }
    }

    /// Sends the queued entries in submission order, consecutive publishes
    /// are batched when burst mode is configured.
    async fn flush(&self) -> Result<()> {
        let burst = self.address.collect_time() > 0;
        loop {
            if burst {
                let batch = self
                    .queue
                    .peek_publishes(self.address.burst_mode_max_entries() as i64, self.address.burst_mode_max_bytes());
                if batch.len() > 1 {
                    let msgs: Vec<MsgUnitRaw> = batch
                        .iter()
                        .filter_map(|e| match &e.invocation {
                            Invocation::Publish(msg) => Some(msg.clone()),
                            Invocation::Subscribe { .. } => None,
                        })
                        .collect();
                    match self.transport.publish_arr(&msgs).await {
                        Ok(_) => {}
                        Err(e) if error::is_communication(&e) => return Err(e),
                        Err(e) => {
                            let reason = error::typed(&e);
                            for entry in &batch {
                                self.listener.dead_message(entry, &reason);
                            }
                        }
                    }
                    self.queue.remove(batch.len());
                    continue;
                }
            }

            let entry = match self.queue.peek() {
                Some(entry) => entry,
                None => break,
            };
            let res = match &entry.invocation {
                Invocation::Publish(msg) => self.transport.publish(msg).await.map(|_| ()),
                Invocation::Subscribe { key, qos } => self.transport.subscribe(key, qos).await.map(|_| ()),
            };
            match res {
                Ok(()) => {}
                Err(e) if error::is_communication(&e) => return Err(e),
                Err(e) => self.listener.dead_message(&entry, &error::typed(&e)),
            }
            self.queue.remove(1);
        }
        log::debug!("{} client queue flushed", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use async_trait::async_trait;

    use super::*;
    use crate::qos::MsgQosData;

    #[derive(Default)]
    struct MockTransport {
        up: AtomicBool,
        instance: Mutex<String>,
        connects: AtomicUsize,
        published: Mutex<Vec<String>>,
        batches: Mutex<Vec<usize>>,
        subscribed: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn up(instance: &str) -> Arc<Self> {
            let t = Self::default();
            t.set_up(true);
            *t.instance.lock() = instance.into();
            Arc::new(t)
        }

        fn down() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn set_up(&self, up: bool) {
            self.up.store(up, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(XmlBlasterError::Communication("connection refused".into()).into())
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, qos: &str) -> Result<String> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            let qos = ConnectQosData::read_object(qos)?;
            let instance = self.instance.lock().clone();
            let mut ret = ConnectReturnQos::new();
            if let Some(name) = qos.session_name() {
                ret.session_mut().set_name(name.clone());
            }
            //a restarted server does not know the old session
            ret.set_secret_session_id(format!("{}-secret", instance));
            ret.set_instance_id(instance);
            Ok(ret.to_xml())
        }

        async fn disconnect(&self, _qos: &str) -> Result<()> {
            Ok(())
        }

        async fn publish(&self, msg: &MsgUnitRaw) -> Result<String> {
            self.check()?;
            self.published.lock().push(msg.key.clone());
            Ok("<qos/>".into())
        }

        async fn publish_arr(&self, msgs: &[MsgUnitRaw]) -> Result<Vec<String>> {
            self.check()?;
            self.batches.lock().push(msgs.len());
            let mut published = self.published.lock();
            published.extend(msgs.iter().map(|m| m.key.clone()));
            Ok(vec!["<qos/>".to_owned(); msgs.len()])
        }

        async fn subscribe(&self, key: &str, qos: &str) -> Result<String> {
            self.check()?;
            self.subscribed.lock().push(key.to_owned());
            let qos = QueryQosData::read_object(qos)?;
            let id = qos.subscription_id().map(|s| s.to_owned()).unwrap_or_else(|| "__subId:server-1".into());
            Ok(StatusQosData::subscribed(id).to_xml())
        }

        async fn unsubscribe(&self, _key: &str, _qos: &str) -> Result<Vec<String>> {
            self.check()?;
            Ok(vec!["<qos/>".into()])
        }

        async fn get(&self, key: &str, _qos: &str) -> Result<Vec<MsgUnitRaw>> {
            self.check()?;
            Ok(vec![MsgUnitRaw::new(key, "hello", "<qos/>")])
        }

        async fn erase(&self, _key: &str, _qos: &str) -> Result<Vec<String>> {
            self.check()?;
            Ok(vec!["<qos><state id='ERASED'/></qos>".into()])
        }

        async fn ping(&self, _qos: &str) -> Result<String> {
            self.check()?;
            Ok("<qos/>".into())
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Events {
        alive: Mutex<Vec<ServerInstance>>,
        polling: AtomicUsize,
        dead: AtomicUsize,
        dead_messages: Mutex<Vec<String>>,
    }

    impl Listener for Events {
        fn reached_alive(&self, _old: ConnectionState, server: ServerInstance) {
            self.alive.lock().push(server);
        }

        fn reached_polling(&self, _old: ConnectionState) {
            self.polling.fetch_add(1, Ordering::SeqCst);
        }

        fn reached_dead(&self, _old: ConnectionState, _reason: &XmlBlasterError) {
            self.dead.fetch_add(1, Ordering::SeqCst);
        }

        fn dead_message(&self, _entry: &QueueEntry, reason: &XmlBlasterError) {
            self.dead_messages.lock().push(reason.error_code().to_owned());
        }
    }

    fn connect_qos(retries: i32, delay: i64, max_entries: i64) -> ConnectQosData {
        let mut qos = ConnectQosData::with_login("joe/1", "secret").unwrap();
        qos.client_queue_mut().set_max_entries(max_entries);
        let address = qos.address_mut();
        address.set_retries(retries);
        address.set_delay(delay);
        address.set_ping_interval(0);
        qos
    }

    fn msg(key: &str) -> MsgUnit {
        MsgUnit::new(key, "hello", MsgQosData::new())
    }

    fn code(e: &Error) -> String {
        e.downcast_ref::<XmlBlasterError>().unwrap().error_code().to_owned()
    }

    fn sleep(millis: u64) -> tokio::time::Sleep {
        tokio::time::sleep(Duration::from_millis(millis))
    }

    #[tokio::test(start_paused = true)]
    async fn test_finite_retries_reach_dead_once() {
        let transport = MockTransport::down();
        let events = Arc::new(Events::default());
        let qos = connect_qos(3, 100, 1000);
        let handler = ConnectionsHandler::new(&qos, transport.clone(), events.clone());

        let ret = handler.connect(qos).await.unwrap();
        assert_eq!(ret.state_info(), Some(state_info::QUEUED));
        assert!(handler.is_polling());
        let ret = handler.publish(msg("k0")).await.unwrap();
        assert_eq!(ret.state_info(), Some(state_info::QUEUED));

        sleep(2000).await;
        assert!(handler.is_dead());
        assert_eq!(events.dead.load(Ordering::SeqCst), 1);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 4);
        assert_eq!(*events.dead_messages.lock(), vec!["communication.noConnection.dead".to_owned()]);
        assert_eq!(handler.queue_len(), 0);

        let err = handler.publish(msg("k1")).await.unwrap_err();
        assert_eq!(code(&err), "communication.noConnection.dead");
        sleep(1000).await;
        assert_eq!(events.dead.load(Ordering::SeqCst), 1);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_retries_never_die() {
        let transport = MockTransport::down();
        let events = Arc::new(Events::default());
        let qos = connect_qos(-1, 100, 1000);
        let handler = ConnectionsHandler::new(&qos, transport.clone(), events.clone());
        handler.connect(qos).await.unwrap();

        sleep(10_000).await;
        assert!(handler.is_polling());
        assert_eq!(events.dead.load(Ordering::SeqCst), 0);
        assert!(transport.connects.load(Ordering::SeqCst) > 50);

        *transport.instance.lock() = "A".into();
        transport.set_up(true);
        sleep(200).await;
        assert!(handler.is_alive());
        assert_eq!(*events.alive.lock(), vec![ServerInstance::Initial]);
        assert_eq!(handler.secret_session_id().as_deref(), Some("A-secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_flush_order() {
        let transport = MockTransport::down();
        let events = Arc::new(Events::default());
        let qos = connect_qos(-1, 100, 5);
        let handler = ConnectionsHandler::new(&qos, transport.clone(), events.clone());
        handler.connect(qos).await.unwrap();

        let keys: Vec<String> = (0..5).map(|i| format!("k{}", i)).collect();
        for key in &keys {
            handler.publish(msg(key)).await.unwrap();
        }
        assert_eq!(handler.queue_len(), 5);

        transport.set_up(true);
        sleep(500).await;
        assert!(handler.is_alive());
        assert_eq!(*transport.published.lock(), keys);
        assert_eq!(handler.queue_len(), 0);
        assert!(transport.batches.lock().is_empty());
        assert!(events.dead_messages.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_mode_flush() {
        let transport = MockTransport::down();
        let events = Arc::new(Events::default());
        let mut qos = connect_qos(-1, 100, 100);
        qos.address_mut().set_collect_time(50);
        qos.address_mut().set_burst_mode_max_entries(2);
        let handler = ConnectionsHandler::new(&qos, transport.clone(), events.clone());
        handler.connect(qos).await.unwrap();

        handler.publish(msg("k0")).await.unwrap();
        handler.publish(msg("k1")).await.unwrap();
        handler.publish(msg("k2")).await.unwrap();
        handler.subscribe("s0", QueryQosData::new()).await.unwrap();
        handler.publish(msg("k3")).await.unwrap();

        transport.set_up(true);
        sleep(500).await;
        assert!(handler.is_alive());
        assert_eq!(*transport.published.lock(), vec!["k0", "k1", "k2", "k3"]);
        assert_eq!(*transport.batches.lock(), vec![2]);
        assert_eq!(*transport.subscribed.lock(), vec!["s0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_dead_letter() {
        let transport = MockTransport::down();
        let events = Arc::new(Events::default());
        let qos = connect_qos(-1, 100, 2);
        let handler = ConnectionsHandler::new(&qos, transport.clone(), events.clone());
        handler.connect(qos).await.unwrap();

        handler.publish(msg("k0")).await.unwrap();
        handler.publish(msg("k1")).await.unwrap();
        let err = handler.publish(msg("k2")).await.unwrap_err();
        assert_eq!(code(&err), "resource.overflow.queue.entries");
        assert_eq!(*events.dead_messages.lock(), vec!["resource.overflow.queue.entries".to_owned()]);
        assert_eq!(handler.queue_len(), 2);

        transport.set_up(true);
        sleep(300).await;
        assert_eq!(*transport.published.lock(), vec!["k0", "k1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_and_new_server() {
        let transport = MockTransport::up("A");
        let events = Arc::new(Events::default());
        let qos = connect_qos(-1, 100, 1000);
        let handler = ConnectionsHandler::new(&qos, transport.clone(), events.clone());
        let ret = handler.connect(qos).await.unwrap();
        assert_eq!(ret.secret_session_id(), Some("A-secret"));
        assert!(handler.is_alive());

        transport.set_up(false);
        let ret = handler.publish(msg("k0")).await.unwrap();
        assert_eq!(ret.state_info(), Some(state_info::QUEUED));
        assert!(handler.is_polling());
        transport.set_up(true);
        sleep(300).await;
        assert!(handler.is_alive());
        assert_eq!(*transport.published.lock(), vec!["k0"]);

        transport.set_up(false);
        handler.publish(msg("k1")).await.unwrap();
        *transport.instance.lock() = "B".into();
        transport.set_up(true);
        sleep(300).await;
        assert!(handler.is_alive());
        assert_eq!(
            *events.alive.lock(),
            vec![ServerInstance::Initial, ServerInstance::Same, ServerInstance::New]
        );
        assert_eq!(events.polling.load(Ordering::SeqCst), 2);
        assert_eq!(handler.secret_session_id().as_deref(), Some("B-secret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_retries() {
        let transport = MockTransport::down();
        let events = Arc::new(Events::default());
        let qos = connect_qos(-1, 100, 1000);
        let handler = ConnectionsHandler::new(&qos, transport.clone(), events.clone());
        handler.connect(qos).await.unwrap();
        handler.publish(msg("k0")).await.unwrap();

        sleep(350).await;
        let attempts = transport.connects.load(Ordering::SeqCst);
        assert!(attempts > 1);
        assert!(handler.disconnect(DisconnectQosData::new()).await.unwrap());
        assert!(handler.is_dead());
        assert_eq!(handler.queue_len(), 0);

        sleep(1000).await;
        assert_eq!(transport.connects.load(Ordering::SeqCst), attempts);
        assert_eq!(events.dead.load(Ordering::SeqCst), 1);
        assert!(events.dead_messages.lock().is_empty());
        let err = handler.publish(msg("k1")).await.unwrap_err();
        assert_eq!(code(&err), "communication.noConnection.dead");
        assert!(!handler.disconnect(DisconnectQosData::new()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_rejects_synchronous_calls() {
        let transport = MockTransport::down();
        let events = Arc::new(Events::default());
        let qos = connect_qos(-1, 100, 1000);
        let handler = ConnectionsHandler::new(&qos, transport.clone(), events.clone());

        let err = handler.get("k", QueryQosData::new()).await.unwrap_err();
        assert_eq!(code(&err), "communication.noConnection");

        handler.connect(qos).await.unwrap();
        let err = handler.get("k", QueryQosData::new()).await.unwrap_err();
        assert_eq!(code(&err), "communication.noConnection.polling");
        let err = handler.erase("k", QueryQosData::new()).await.unwrap_err();
        assert_eq!(code(&err), "communication.noConnection.polling");
        let err = handler.unsubscribe("k", QueryQosData::new()).await.unwrap_err();
        assert_eq!(code(&err), "communication.noConnection.polling");

        let ret = handler.subscribe("k", QueryQosData::new()).await.unwrap();
        assert!(ret.subscription_id().unwrap().starts_with("__subId:"));
        assert_eq!(ret.state_info(), Some(state_info::QUEUED));

        transport.set_up(true);
        sleep(300).await;
        let msgs = handler.get("k", QueryQosData::new()).await.unwrap();
        assert_eq!(&msgs[0].content[..], b"hello");
        let rets = handler.erase("k", QueryQosData::new()).await.unwrap();
        assert!(rets[0].is_erased());
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_fail_safe() {
        let transport = MockTransport::down();
        let events = Arc::new(Events::default());
        let qos = connect_qos(-1, 0, 1000);
        let handler = ConnectionsHandler::new(&qos, transport.clone(), events.clone());

        let err = handler.connect(qos.clone()).await.unwrap_err();
        assert_eq!(code(&err), "communication");
        assert_eq!(handler.state(), ConnectionState::Undef);

        transport.set_up(true);
        handler.connect(qos).await.unwrap();
        assert!(handler.is_alive());
        transport.set_up(false);
        let err = handler.publish(msg("k0")).await.unwrap_err();
        assert_eq!(code(&err), "communication.noConnection.dead");
        assert!(handler.is_dead());
        assert_eq!(events.polling.load(Ordering::SeqCst), 0);
        assert_eq!(events.dead.load(Ordering::SeqCst), 1);
    }
}

//! 連線引擎
//!
//! 每個連線有一個背景輪詢工作：讀取資料、處理 Telnet 協商、切行並交給觸發器，
//! 再將整個區塊正規化後送到接收端。寫入與輪詢可以同時進行，
//! 寫入鎖不會在讀取時被持有。

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use encoding_rs::Encoding;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::buffer::LineSplitter;
use crate::config::ConnectionConfig;
use crate::consumer::{Consumer, Message, MessageBody};
use crate::encoding::{self, EncodingError, EscapeGrammar};
use crate::script::ScriptGateway;
use crate::telnet::{OptionNegotiator, ProtocolSignal, TelnetEvent, TelnetParser, IAC};
use crate::trigger::{self, ActionError, ActionSink, Trigger, TriggerEngine};

/// 被讀取切斷的控制序列最多保留的位元組數
const MAX_ESCAPE_CARRY: usize = 64;

/// 連線錯誤
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("DNS 解析失敗: {0}")]
    DnsResolutionFailed(String),

    #[error("連線被拒絕: {0}")]
    Refused(SocketAddr),

    #[error("連線逾時")]
    Timeout,

    #[error("連線失敗: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    UnknownEncoding(#[from] EncodingError),
}

/// 寫入錯誤
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("未連線")]
    NotConnected,

    #[error("沒有可用的腳本閘道")]
    NoScriptGateway,

    #[error("寫入失敗: {0}")]
    Io(#[from] io::Error),
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 連線建構器
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    consumer: Arc<dyn Consumer>,
    triggers: Arc<TriggerEngine>,
    gateway: Option<Arc<dyn ScriptGateway>>,
}

impl ConnectionBuilder {
    pub fn new(config: ConnectionConfig, consumer: Arc<dyn Consumer>) -> Self {
        Self {
            config,
            consumer,
            triggers: Arc::new(TriggerEngine::new()),
            gateway: None,
        }
    }

    /// 使用共享的觸發器集合
    pub fn triggers(mut self, triggers: Arc<TriggerEngine>) -> Self {
        self.triggers = triggers;
        self
    }

    /// 設定腳本閘道
    pub fn gateway(mut self, gateway: Arc<dyn ScriptGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// 連線到 MUD 伺服器
    ///
    /// 失敗時不會留下任何狀態
    pub async fn connect(self, host: &str, port: u16) -> Result<Connection, ConnectError> {
        let encoding = self.config.resolve_encoding()?;
        info!("正在連線到 {}:{}", host, port);

        let addr = format!("{}:{}", host, port);
        let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| ConnectError::DnsResolutionFailed(format!("{}: {}", host, e)))?
            .collect();

        if socket_addrs.is_empty() {
            return Err(ConnectError::DnsResolutionFailed(format!(
                "無法解析主機: {}",
                host
            )));
        }
        debug!("已解析到位址: {:?}", socket_addrs);

        let mut last_error = None;
        for socket_addr in socket_addrs {
            match timeout(self.config.connect_timeout(), TcpStream::connect(socket_addr)).await {
                Err(_) => last_error = Some(ConnectError::Timeout),
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    last_error = Some(ConnectError::Refused(socket_addr))
                }
                Ok(Err(e)) => last_error = Some(ConnectError::Io(e)),
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    info!("已連線到 {}:{}", host, port);
                    let (reader, writer) = stream.into_split();
                    return Ok(self.build(host, port, encoding, Box::new(reader), Box::new(writer)));
                }
            }
        }

        Err(last_error.unwrap_or(ConnectError::Timeout))
    }

    /// 使用既有的傳輸層（例如測試用的 duplex）
    pub fn attach<S>(self, host: &str, port: u16, stream: S) -> Result<Connection, ConnectError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let encoding = self.config.resolve_encoding()?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(self.build(host, port, encoding, Box::new(reader), Box::new(writer)))
    }

    fn build(
        self,
        host: &str,
        port: u16,
        encoding: &'static Encoding,
        reader: BoxedReader,
        writer: BoxedWriter,
    ) -> Connection {
        let (shutdown_tx, _) = watch::channel(false);
        let grammar = self.config.grammar();

        Connection {
            inner: Arc::new(Inner {
                host: host.to_string(),
                port,
                config: self.config,
                encoding,
                grammar,
                triggers: self.triggers,
                consumer: self.consumer,
                gateway: self.gateway,
                running: AtomicBool::new(true),
                started: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                notified: AtomicBool::new(false),
                reader: Mutex::new(Some(reader)),
                writer: tokio::sync::Mutex::new(Some(writer)),
                shutdown_tx,
                task: Mutex::new(None),
            }),
        }
    }
}

struct Inner {
    host: String,
    port: u16,
    config: ConnectionConfig,
    encoding: &'static Encoding,
    grammar: EscapeGrammar,
    triggers: Arc<TriggerEngine>,
    consumer: Arc<dyn Consumer>,
    gateway: Option<Arc<dyn ScriptGateway>>,
    running: AtomicBool,
    started: AtomicBool,
    closing: AtomicBool,
    notified: AtomicBool,
    /// 在 `start` 時交給輪詢工作
    reader: Mutex<Option<BoxedReader>>,
    /// 寫入鎖，只在寫入期間持有
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// 一個 MUD 連線
///
/// 可以 clone 並在多個工作間共享；斷線後不可重用，需要重新建立。
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// 輪詢工作獨佔的狀態
struct PollState {
    parser: TelnetParser,
    negotiator: OptionNegotiator,
    splitter: LineSplitter,
    /// 被切斷、尚未結束的控制序列
    escape_carry: Vec<u8>,
}

impl PollState {
    fn new(config: &ConnectionConfig) -> Self {
        Self {
            parser: TelnetParser::with_subnegotiation_limit(config.read_buffer_size),
            negotiator: OptionNegotiator::new(),
            splitter: LineSplitter::new(),
            escape_carry: Vec::new(),
        }
    }
}

enum PollEvent {
    Shutdown,
    Read(io::Result<usize>),
    Idle,
}

impl Connection {
    /// 以預設設定連線
    pub async fn connect(
        host: &str,
        port: u16,
        consumer: Arc<dyn Consumer>,
    ) -> Result<Self, ConnectError> {
        ConnectionBuilder::new(ConnectionConfig::default(), consumer)
            .connect(host, port)
            .await
    }

    pub fn builder(config: ConnectionConfig, consumer: Arc<dyn Consumer>) -> ConnectionBuilder {
        ConnectionBuilder::new(config, consumer)
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn triggers(&self) -> &Arc<TriggerEngine> {
        &self.inner.triggers
    }

    /// `false` 表示輪詢迴圈已結束或將在下次喚醒時結束
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// 啟動背景輪詢；重複呼叫不會有作用
    ///
    /// 必須在 tokio runtime 中呼叫
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.inner.closing.load(Ordering::Acquire) {
            warn!("連線已關閉，不會啟動輪詢");
            return;
        }
        let Some(reader) = lock(&self.inner.reader).take() else {
            return;
        };

        let shutdown = self.inner.shutdown_tx.subscribe();
        let connection = self.clone();
        let handle = tokio::spawn(async move { connection.poll_loop(reader, shutdown).await });
        *lock(&self.inner.task) = Some(handle);
        debug!("{}:{} 的輪詢已啟動", self.inner.host, self.inner.port);
    }

    /// 送出文字
    ///
    /// 以跳脫字元開頭的文字交給腳本閘道，其餘編碼後加上行結尾送到伺服器
    pub async fn write(&self, text: &str) -> Result<(), WriteError> {
        if let Some(command) = text.strip_prefix(self.inner.config.escape_marker) {
            let gateway = self.inner.gateway.as_ref().ok_or(WriteError::NoScriptGateway)?;
            debug!("交給腳本閘道: {}", command);
            gateway.execute(command, self);
            return Ok(());
        }

        let mut data = Vec::with_capacity(text.len() + 2);
        for byte in encoding::encode(text, self.inner.encoding) {
            // 資料中的 0xFF 必須轉義
            if byte == IAC {
                data.push(IAC);
            }
            data.push(byte);
        }
        data.extend_from_slice(self.inner.config.line_terminator.as_bytes());

        self.write_raw(&data).await?;
        debug!("已發送: {}", text);
        Ok(())
    }

    /// 送出原始位元組
    ///
    /// 對方停止讀取時寫入會阻塞；`disconnect()` 會中止阻塞中的寫入並返回 `NotConnected`
    pub async fn write_raw(&self, data: &[u8]) -> Result<(), WriteError> {
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(WriteError::NotConnected);
        }

        let mut guard = tokio::select! {
            guard = self.inner.writer.lock() => guard,
            _ = shutdown.changed() => return Err(WriteError::NotConnected),
        };
        let writer = guard.as_mut().ok_or(WriteError::NotConnected)?;

        tokio::select! {
            result = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => Ok(result?),
            _ = shutdown.changed() => {
                debug!("連線關閉中，中止寫入 ({} bytes)", data.len());
                Err(WriteError::NotConnected)
            }
        }
    }

    /// 直接顯示文字（腳本輸出），可附帶游標位置
    ///
    /// `caret_offset` 是 `text` 內的 UTF-8 位元組偏移；不在字元邊界上的偏移會被捨棄
    pub fn display(&self, text: &str, caret_offset: Option<usize>) {
        let caret_offset = caret_offset.filter(|&offset| {
            let valid = text.is_char_boundary(offset);
            if !valid {
                warn!("游標位置 {} 不在文字的字元邊界上，已忽略", offset);
            }
            valid
        });
        self.inner.consumer.on_message(Message {
            body: MessageBody::Text(text.to_string()),
            signal: None,
            caret_offset,
        });
    }

    /// 斷開連線
    ///
    /// 可重複呼叫；等待輪詢工作把已讀取的資料處理完才返回
    pub async fn disconnect(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("正在斷開 {}:{}", self.inner.host, self.inner.port);

        self.inner.running.store(false, Ordering::Release);
        self.inner.shutdown_tx.send_replace(true);

        // 阻塞中的寫入收到關閉訊號後會釋放寫入鎖
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            match timeout(self.inner.config.poll_interval(), writer.shutdown()).await {
                Ok(Err(e)) => debug!("關閉寫入端失敗: {}", e),
                Err(_) => debug!("關閉寫入端逾時，直接丟棄"),
                Ok(Ok(())) => {}
            }
        }

        let handle = lock(&self.inner.task).take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("輪詢工作異常結束: {}", e);
                    self.notify_disconnected(Some(e.to_string()));
                }
            }
            None => {
                lock(&self.inner.reader).take();
                self.notify_disconnected(None);
            }
        }
        info!("已斷開連線");
    }

    fn notify_disconnected(&self, reason: Option<String>) {
        if self.inner.notified.swap(true, Ordering::AcqRel) {
            return;
        }
        match &reason {
            Some(reason) => info!("連線中斷: {}", reason),
            None => info!("連線已關閉"),
        }
        self.inner.consumer.on_disconnected(reason);
    }

    async fn poll_loop(self, mut reader: BoxedReader, mut shutdown: watch::Receiver<bool>) {
        for command in &self.inner.config.login_commands {
            if let Err(e) = self.write(command).await {
                warn!("登入命令送出失敗: {}", e);
            }
        }

        let mut state = PollState::new(&self.inner.config);
        let mut buffer = vec![0u8; self.inner.config.read_buffer_size.max(1)];
        let interval = self.inner.config.poll_interval();

        let reason = loop {
            if !self.is_running() {
                break None;
            }

            let event = tokio::select! {
                _ = shutdown.changed() => PollEvent::Shutdown,
                result = reader.read(&mut buffer) => PollEvent::Read(result),
                _ = sleep(interval) => PollEvent::Idle,
            };

            match event {
                PollEvent::Shutdown => break None,
                PollEvent::Idle => continue,
                PollEvent::Read(Ok(0)) => break Some("連線已被伺服器關閉".to_string()),
                PollEvent::Read(Ok(n)) => self.process_chunk(&mut state, &buffer[..n]).await,
                PollEvent::Read(Err(e)) => {
                    error!("讀取錯誤: {}", e);
                    break Some(format!("讀取錯誤: {}", e));
                }
            }
        };

        self.flush(&mut state);
        self.inner.running.store(false, Ordering::Release);
        // 讓阻塞中的寫入放開寫入鎖
        self.inner.shutdown_tx.send_replace(true);
        self.inner.writer.lock().await.take();
        drop(reader);
        self.notify_disconnected(reason);
    }

    /// 處理一次讀到的區塊
    async fn process_chunk(&self, state: &mut PollState, bytes: &[u8]) {
        let (data, events) = state.parser.feed(bytes);

        let mut signals = Vec::new();
        for event in events {
            match event {
                TelnetEvent::Negotiation(cmd, option) => {
                    debug!("收到協商: {:?} {:?}", cmd, option);
                    let negotiation = state.negotiator.handle(cmd, option);
                    if let Some(reply) = negotiation.reply {
                        if let Err(e) = self.write_raw(&reply).await {
                            warn!("協商回應送出失敗: {}", e);
                        }
                    }
                    signals.extend(negotiation.signal);
                }
                other => debug!("忽略 Telnet 事件: {:?}", other),
            }
        }

        let snapshot = self.inner.triggers.snapshot();
        let mut outgoing = Vec::new();
        for line in state.splitter.push(&data) {
            self.run_triggers(&snapshot, &line.content, &mut outgoing);
        }

        self.deliver(state, &data, signals);

        for command in outgoing {
            if let Err(e) = self.write(&command).await {
                warn!("觸發器命令 '{}' 送出失敗: {}", command, e);
            }
        }
    }

    fn run_triggers(&self, snapshot: &[Trigger], line: &[u8], outgoing: &mut Vec<String>) {
        if snapshot.is_empty() {
            return;
        }
        let text = encoding::decode(line, self.inner.encoding);
        let mut sink = TickSink {
            connection: self,
            outgoing,
        };
        trigger::evaluate(snapshot, &text, &mut sink);
    }

    /// 正規化整個區塊並送到接收端
    fn deliver(&self, state: &mut PollState, data: &[u8], signals: Vec<ProtocolSignal>) {
        let body = if self.inner.config.strip_ansi {
            let mut bytes = std::mem::take(&mut state.escape_carry);
            bytes.extend_from_slice(data);
            if let Some(start) = self.inner.grammar.unterminated_tail(&bytes) {
                if bytes.len() - start <= MAX_ESCAPE_CARRY {
                    state.escape_carry = bytes.split_off(start);
                }
            }
            MessageBody::Text(encoding::normalize(
                &bytes,
                self.inner.encoding,
                &self.inner.grammar,
            ))
        } else {
            MessageBody::Raw(data.to_vec())
        };

        self.emit(body, signals);
    }

    fn emit(&self, body: MessageBody, signals: Vec<ProtocolSignal>) {
        if signals.is_empty() {
            if !body.is_empty() {
                self.inner.consumer.on_message(Message {
                    body,
                    signal: None,
                    caret_offset: None,
                });
            }
            return;
        }

        // 第一則訊息帶文字，其餘訊號各自一則
        let empty = match &body {
            MessageBody::Text(_) => MessageBody::Text(String::new()),
            MessageBody::Raw(_) => MessageBody::Raw(Vec::new()),
        };
        let mut body = Some(body);
        for signal in signals {
            self.inner.consumer.on_message(Message {
                body: body.take().unwrap_or_else(|| empty.clone()),
                signal: Some(signal),
                caret_offset: None,
            });
        }
    }

    /// 關閉前處理所有已讀取但尚未處理的資料
    fn flush(&self, state: &mut PollState) {
        let remainder = state.splitter.take_remainder();
        if !remainder.is_empty() {
            let mut outgoing = Vec::new();
            self.run_triggers(&self.inner.triggers.snapshot(), &remainder, &mut outgoing);
            if !outgoing.is_empty() {
                debug!("連線關閉中，丟棄 {} 個觸發器命令", outgoing.len());
            }
        }

        let carry = std::mem::take(&mut state.escape_carry);
        if !carry.is_empty() {
            let text = encoding::normalize(&carry, self.inner.encoding, &self.inner.grammar);
            self.emit(MessageBody::Text(text), Vec::new());
        }
    }
}

/// 單次輪詢的動作執行端
struct TickSink<'a> {
    connection: &'a Connection,
    outgoing: &'a mut Vec<String>,
}

impl ActionSink for TickSink<'_> {
    fn send(&mut self, command: String) -> Result<(), ActionError> {
        self.outgoing.push(command);
        Ok(())
    }

    fn script(&mut self, command: String) -> Result<(), ActionError> {
        let gateway = self
            .connection
            .inner
            .gateway
            .as_ref()
            .ok_or_else(|| ActionError::Failed(WriteError::NoScriptGateway.to_string()))?;
        gateway.execute(&command, self.connection);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ChannelConsumer, ConsumerEvent};
    use crate::telnet::TelnetCommand;
    use crate::trigger::TriggerAction;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct RecordingGateway {
        commands: Mutex<Vec<String>>,
    }

    impl ScriptGateway for RecordingGateway {
        fn execute(&self, command: &str, connection: &Connection) {
            self.commands.lock().unwrap().push(command.to_string());
            if let Some(text) = command.strip_prefix("echo ") {
                connection.display(text, Some(0));
            }
        }
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            poll_interval_ms: 10,
            ..ConnectionConfig::default()
        }
    }

    fn attach(
        config: ConnectionConfig,
        triggers: Arc<TriggerEngine>,
        gateway: Option<Arc<RecordingGateway>>,
    ) -> (Connection, DuplexStream, UnboundedReceiver<ConsumerEvent>) {
        let (client, server) = tokio::io::duplex(4096);
        let (consumer, events) = ChannelConsumer::new();
        let mut builder = Connection::builder(config, Arc::new(consumer)).triggers(triggers);
        if let Some(gateway) = gateway {
            builder = builder.gateway(gateway);
        }
        let connection = builder.attach("test", 4000, client).unwrap();
        (connection, server, events)
    }

    async fn next_event(events: &mut UnboundedReceiver<ConsumerEvent>) -> ConsumerEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("逾時")
            .expect("channel 已關閉")
    }

    async fn read_some(server: &mut DuplexStream) -> Vec<u8> {
        let mut buf = vec![0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(2), server.read(&mut buf))
            .await
            .expect("逾時")
            .unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn test_chunk_is_normalized_and_triggers_see_lines() {
        let count = Arc::new(AtomicUsize::new(0));
        let triggers = Arc::new(TriggerEngine::new());
        let counter = Arc::clone(&count);
        triggers.add(Trigger::regex("second", "^Second").unwrap().add_action(
            TriggerAction::callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ));

        let (connection, mut server, mut events) = attach(test_config(), triggers, None);
        connection.start();

        server
            .write_all(b"Hello \x1b[31mworld\x1b[0m\r\nSecond line\r\n")
            .await
            .unwrap();

        let event = next_event(&mut events).await;
        assert_eq!(
            event,
            ConsumerEvent::Message(Message::text("Hello world\nSecond line"))
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn test_write_routes_escape_marker_to_gateway() {
        let gateway = Arc::new(RecordingGateway::default());
        let (connection, mut server, mut events) =
            attach(test_config(), Arc::new(TriggerEngine::new()), Some(Arc::clone(&gateway)));
        connection.start();

        assert_ok!(connection.write("#say hi").await);
        assert_ok!(connection.write("look").await);

        assert_eq!(read_some(&mut server).await, b"look\r\n");
        assert_eq!(*gateway.commands.lock().unwrap(), vec!["say hi"]);

        assert_ok!(connection.write("#echo from script").await);
        match next_event(&mut events).await {
            ConsumerEvent::Message(message) => {
                assert_eq!(message.as_text(), Some("from script"));
                assert_eq!(message.caret_offset, Some(0));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn test_escape_marker_without_gateway_is_an_error() {
        let (connection, _server, _events) =
            attach(test_config(), Arc::new(TriggerEngine::new()), None);
        let result = connection.write("#say hi").await;
        assert!(matches!(result, Err(WriteError::NoScriptGateway)));
    }

    #[tokio::test]
    async fn test_disconnect_twice_notifies_once() {
        let (connection, _server, mut events) =
            attach(test_config(), Arc::new(TriggerEngine::new()), None);
        connection.start();

        connection.disconnect().await;
        connection.disconnect().await;

        assert_eq!(next_event(&mut events).await, ConsumerEvent::Disconnected(None));
        assert!(events.try_recv().is_err());
        assert!(!connection.is_running());
        assert_err!(connection.write("look").await);
    }

    #[tokio::test]
    async fn test_disconnect_aborts_write_when_peer_stops_reading() {
        let (client, mut server) = tokio::io::duplex(64);
        let (consumer, mut events) = ChannelConsumer::new();
        let connection = Connection::builder(test_config(), Arc::new(consumer))
            .attach("test", 4000, client)
            .unwrap();
        connection.start();

        let writer = connection.clone();
        let blocked = tokio::spawn(async move { writer.write(&"x".repeat(10_000)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        let writer = connection.clone();
        let queued = tokio::spawn(async move { writer.write("look").await });

        // 寫入阻塞時輪詢照常送達伺服器資料
        server.write_all(b"still reading\r\n").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ConsumerEvent::Message(Message::text("still reading"))
        );

        tokio::time::timeout(Duration::from_secs(2), connection.disconnect())
            .await
            .expect("disconnect 逾時");
        assert_eq!(next_event(&mut events).await, ConsumerEvent::Disconnected(None));
        assert!(!connection.is_running());

        for handle in [blocked, queued] {
            let result = tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("寫入未中止")
                .unwrap();
            assert!(matches!(result, Err(WriteError::NotConnected)));
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_display_drops_caret_inside_a_character() {
        let (connection, _server, mut events) =
            attach(test_config(), Arc::new(TriggerEngine::new()), None);

        connection.display("你好", Some(3));
        connection.display("你好", Some(1));

        for expected in [Some(3), None] {
            match next_event(&mut events).await {
                ConsumerEvent::Message(message) => assert_eq!(message.caret_offset, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_disconnect_before_start_notifies() {
        let (connection, _server, mut events) =
            attach(test_config(), Arc::new(TriggerEngine::new()), None);
        connection.disconnect().await;
        connection.start();

        assert_eq!(next_event(&mut events).await, ConsumerEvent::Disconnected(None));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_close_reports_reason() {
        let (connection, server, mut events) =
            attach(test_config(), Arc::new(TriggerEngine::new()), None);
        connection.start();
        drop(server);

        match next_event(&mut events).await {
            ConsumerEvent::Disconnected(Some(_)) => {}
            other => panic!("unexpected event: {:?}", other),
        }
        connection.disconnect().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_echo_negotiation_signals() {
        let (connection, mut server, mut events) =
            attach(test_config(), Arc::new(TriggerEngine::new()), None);
        connection.start();

        let mut input = b"Password: ".to_vec();
        input.extend_from_slice(&[IAC, TelnetCommand::Will as u8, 1]);
        server.write_all(&input).await.unwrap();

        match next_event(&mut events).await {
            ConsumerEvent::Message(message) => {
                assert_eq!(message.as_text(), Some("Password: "));
                assert_eq!(message.signal, Some(ProtocolSignal::HideInput));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(read_some(&mut server).await, vec![IAC, TelnetCommand::Do as u8, 1]);

        server
            .write_all(&[IAC, TelnetCommand::Wont as u8, 1])
            .await
            .unwrap();
        match next_event(&mut events).await {
            ConsumerEvent::Message(message) => {
                assert_eq!(message.signal, Some(ProtocolSignal::ShowInput));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn test_trigger_send_action_writes_to_server() {
        let triggers = Arc::new(TriggerEngine::new());
        triggers.add(
            Trigger::regex("greet", r"^(\w+) waves")
                .unwrap()
                .add_action(TriggerAction::Send("wave $1".to_string())),
        );
        let (connection, mut server, _events) = attach(test_config(), triggers, None);
        connection.start();

        server.write_all(b"Bob waves at you.\r\n").await.unwrap();
        assert_eq!(read_some(&mut server).await, b"wave Bob\r\n");

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn test_login_commands_are_sent_on_start() {
        let config = ConnectionConfig {
            login_commands: vec!["hero".to_string(), "secret".to_string()],
            ..test_config()
        };
        let (connection, mut server, _events) =
            attach(config, Arc::new(TriggerEngine::new()), None);
        connection.start();

        let mut received = Vec::new();
        while received.len() < b"hero\r\nsecret\r\n".len() {
            received.extend(read_some(&mut server).await);
        }
        assert_eq!(received, b"hero\r\nsecret\r\n");

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn test_raw_mode_passes_bytes_through() {
        let config = ConnectionConfig {
            strip_ansi: false,
            ..test_config()
        };
        let (connection, mut server, mut events) =
            attach(config, Arc::new(TriggerEngine::new()), None);
        connection.start();

        server.write_all(b"\x1b[32mgreen\x1b[0m\r\n").await.unwrap();
        match next_event(&mut events).await {
            ConsumerEvent::Message(message) => {
                assert_eq!(message.body, MessageBody::Raw(b"\x1b[32mgreen\x1b[0m\r\n".to_vec()));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn test_unknown_encoding_fails_before_connecting() {
        let config = ConnectionConfig {
            encoding: "not-an-encoding".to_string(),
            ..ConnectionConfig::default()
        };
        let (consumer, _events) = ChannelConsumer::new();
        let result = Connection::builder(config, Arc::new(consumer))
            .connect("127.0.0.1", 1)
            .await;
        assert!(matches!(result, Err(ConnectError::UnknownEncoding(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (consumer, _events) = ChannelConsumer::new();
        let result = Connection::connect("127.0.0.1", port, Arc::new(consumer)).await;
        assert!(matches!(result, Err(ConnectError::Refused(_))));
    }
}

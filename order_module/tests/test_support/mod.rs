#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ledger_module::{Entry, LedgerStore};
use order_module::{
    Assignee, EngineConfig, MessageRef, OrderEngine, RenderError, Renderer, StatusView,
    WorkflowInstance,
};
use tempfile::TempDir;

pub const ORDERS_CHANNEL: u64 = 1_000;

/// Renderer that keeps everything in memory and can be told to fail.
#[derive(Default)]
pub struct RecordingRenderer {
    next_id: AtomicU64,
    pub fail_assignment_prompt: AtomicBool,
    pub fail_work_prompt: AtomicBool,
    pub fail_status: AtomicBool,
    pub assignment_prompts: Mutex<Vec<(String, Vec<String>)>>,
    pub marked_assigned: Mutex<Vec<(MessageRef, String)>>,
    /// Live work prompts keyed by message, with the owning assignee id.
    pub work_prompts: Mutex<HashMap<MessageRef, String>>,
    pub updated_prompts: Mutex<Vec<MessageRef>>,
    pub summaries: Mutex<Vec<Entry>>,
    pub statuses: Mutex<Vec<StatusView>>,
    pub purged: Mutex<Vec<(u64, u8)>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ref(&self, channel_id: u64) -> MessageRef {
        MessageRef {
            channel_id,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn channel_id(assignee: &Assignee) -> u64 {
        2_000 + assignee.id.len() as u64
    }

    pub fn open_prompts_for(&self, assignee_id: &str) -> usize {
        self.work_prompts
            .lock()
            .unwrap()
            .values()
            .filter(|owner| owner.as_str() == assignee_id)
            .count()
    }

    pub fn assignment_prompt_count(&self) -> usize {
        self.assignment_prompts.lock().unwrap().len()
    }

    pub fn status_count(&self) -> usize {
        self.statuses.lock().unwrap().len()
    }
}

#[async_trait]
impl Renderer for RecordingRenderer {
    fn channel_label(&self, assignee: &Assignee) -> String {
        format!("#{}-orders", assignee.id)
    }

    async fn publish_assignment_prompt(
        &self,
        instance: &WorkflowInstance,
        options: &[Assignee],
    ) -> Result<MessageRef, RenderError> {
        if self.fail_assignment_prompt.load(Ordering::SeqCst) {
            return Err(RenderError::ChannelUnavailable("orders".to_string()));
        }
        self.assignment_prompts.lock().unwrap().push((
            instance.key.to_string(),
            options.iter().map(|option| option.id.clone()).collect(),
        ));
        Ok(self.next_ref(ORDERS_CHANNEL))
    }

    async fn mark_assigned(
        &self,
        prompt: MessageRef,
        instance: &WorkflowInstance,
    ) -> Result<(), RenderError> {
        self.marked_assigned.lock().unwrap().push((
            prompt,
            instance.assignee_id().unwrap_or_default().to_string(),
        ));
        Ok(())
    }

    async fn publish_work_prompt(
        &self,
        _instance: &WorkflowInstance,
        assignee: &Assignee,
    ) -> Result<MessageRef, RenderError> {
        if self.fail_work_prompt.load(Ordering::SeqCst) {
            return Err(RenderError::Rejected("work channel rejected".to_string()));
        }
        let prompt = self.next_ref(Self::channel_id(assignee));
        self.work_prompts
            .lock()
            .unwrap()
            .insert(prompt, assignee.id.clone());
        Ok(prompt)
    }

    async fn update_work_prompt(
        &self,
        prompt: MessageRef,
        _instance: &WorkflowInstance,
    ) -> Result<(), RenderError> {
        self.updated_prompts.lock().unwrap().push(prompt);
        Ok(())
    }

    async fn remove_work_prompt(&self, prompt: MessageRef) -> Result<(), RenderError> {
        self.work_prompts.lock().unwrap().remove(&prompt);
        Ok(())
    }

    async fn append_summary(
        &self,
        _instance: &WorkflowInstance,
        entry: &Entry,
    ) -> Result<(), RenderError> {
        self.summaries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn count_open_orders(&self, assignee: &Assignee) -> Result<usize, RenderError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(RenderError::ChannelUnavailable(self.channel_label(assignee)));
        }
        Ok(self.open_prompts_for(&assignee.id))
    }

    async fn publish_status(
        &self,
        _assignee: &Assignee,
        view: &StatusView,
    ) -> Result<(), RenderError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(RenderError::Rejected("status channel".to_string()));
        }
        self.statuses.lock().unwrap().push(view.clone());
        Ok(())
    }

    async fn purge_messages(&self, channel_id: u64, count: u8) -> Result<usize, RenderError> {
        self.purged.lock().unwrap().push((channel_id, count));
        Ok(usize::from(count))
    }
}

/// An engine over a fresh ledger in a temp dir. Keep the `TempDir` alive for
/// the duration of the test.
pub struct Harness {
    pub temp: TempDir,
    pub ledger: Arc<LedgerStore>,
    pub renderer: Arc<RecordingRenderer>,
    pub engine: Arc<OrderEngine<RecordingRenderer>>,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("tempdir");
        let ledger = Arc::new(LedgerStore::open(temp.path().join("ledger")).expect("open ledger"));
        let renderer = Arc::new(RecordingRenderer::new());
        let engine = Arc::new(OrderEngine::new(
            ledger.clone(),
            renderer.clone(),
            EngineConfig::default(),
        ));
        Self {
            temp,
            ledger,
            renderer,
            engine,
        }
    }
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, hour, minute, 0).unwrap()
}

/// Vendor notification body for one order.
pub fn notification_html(order_number: &str, buyer: &str) -> String {
    format!(
        r#"<table>
  <tr><td>Nomor Pesanan</td><td>{order_number}</td></tr>
  <tr><td>Waktu Transaksi</td><td>2026-10-19 09:15:02</td></tr>
  <tr><td>Nama Pembeli</td><td>{buyer}</td></tr>
  <tr><td>Produk</td><td>Mobile Legends 86 Diamonds<br></td></tr>
  <tr><td>Jumlah</td><td>1</td></tr>
  <tr><td>Harga Produk</td><td><b>Rp 20.000</b></td></tr>
  <tr><td>Informasi Transaksi</td><td>User ID: 12345</td></tr>
</table>
<p>Kirim pesanan maksimal sebelum 20 Oktober 2026 09:15 WIB.</p>"#
    )
}

//! Calling-side headers facade.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;

use blackbox_runtime::{
    FieldFilterSet, FirmwareDate, FirmwareKind, FirmwareVersion, FrameDef, FrameKind,
    OptionalTextHeader, Result, TextHeader, TextSetHeader,
};

use crate::data::AsyncDataParser;
use crate::protocol::{call, HeadersId, Request};

/// Mirror of [`blackbox_runtime::LogHeaders`].
///
/// The worker memoizes decodes exactly like the synchronous facade, so
/// repeated awaits of the same accessor cost one module round trip total.
#[derive(Debug)]
pub struct AsyncLogHeaders {
    tx: mpsc::UnboundedSender<Request>,
    id: HeadersId,
}

impl AsyncLogHeaders {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Request>, id: HeadersId) -> Self {
        Self { tx, id }
    }

    /// The worker-side id backing this facade.
    pub fn id(&self) -> HeadersId {
        self.id
    }

    pub async fn main_frame_def(&self) -> Result<Arc<FrameDef>> {
        self.frame_def(FrameKind::Main).await
    }

    pub async fn slow_frame_def(&self) -> Result<Arc<FrameDef>> {
        self.frame_def(FrameKind::Slow).await
    }

    pub async fn gps_frame_def(&self) -> Result<Arc<FrameDef>> {
        self.frame_def(FrameKind::Gps).await
    }

    pub async fn firmware_revision(&self) -> Result<String> {
        self.text(TextHeader::FirmwareRevision).await
    }

    pub async fn debug_mode(&self) -> Result<String> {
        self.text(TextHeader::DebugMode).await
    }

    pub async fn pwm_protocol(&self) -> Result<String> {
        self.text(TextHeader::PwmProtocol).await
    }

    pub async fn board_info(&self) -> Result<Option<String>> {
        self.optional_text(OptionalTextHeader::BoardInfo).await
    }

    pub async fn craft_name(&self) -> Result<Option<String>> {
        self.optional_text(OptionalTextHeader::CraftName).await
    }

    pub async fn disabled_fields(&self) -> Result<HashSet<String>> {
        self.text_set(TextSetHeader::DisabledFields).await
    }

    pub async fn features(&self) -> Result<HashSet<String>> {
        self.text_set(TextSetHeader::Features).await
    }

    pub async fn firmware_kind(&self) -> Result<FirmwareKind> {
        let id = self.id;
        call(&self.tx, |reply| Request::FirmwareKind { id, reply }).await
    }

    pub async fn firmware_date(&self) -> Result<Option<FirmwareDate>> {
        let id = self.id;
        call(&self.tx, |reply| Request::FirmwareDate { id, reply }).await
    }

    pub async fn firmware_version(&self) -> Result<FirmwareVersion> {
        let id = self.id;
        call(&self.tx, |reply| Request::FirmwareVersion { id, reply }).await
    }

    pub async fn unknown(&self) -> Result<BTreeMap<String, String>> {
        let id = self.id;
        call(&self.tx, |reply| Request::UnknownHeaders { id, reply }).await
    }

    /// Create a parser on the worker; the returned facade drives it by id.
    pub async fn get_data_parser(
        &self,
        filter: Option<FieldFilterSet>,
    ) -> Result<AsyncDataParser> {
        let id = self.id;
        let parser_id = call(&self.tx, |reply| Request::NewData { id, filter, reply }).await?;
        Ok(AsyncDataParser::new(self.tx.clone(), parser_id))
    }

    async fn frame_def(&self, kind: FrameKind) -> Result<Arc<FrameDef>> {
        let id = self.id;
        call(&self.tx, |reply| Request::FrameDef { id, kind, reply }).await
    }

    async fn text(&self, field: TextHeader) -> Result<String> {
        let id = self.id;
        call(&self.tx, |reply| Request::TextHeader { id, field, reply }).await
    }

    async fn optional_text(&self, field: OptionalTextHeader) -> Result<Option<String>> {
        let id = self.id;
        call(&self.tx, |reply| Request::OptionalTextHeader { id, field, reply }).await
    }

    async fn text_set(&self, field: TextSetHeader) -> Result<HashSet<String>> {
        let id = self.id;
        call(&self.tx, |reply| Request::TextSetHeader { id, field, reply }).await
    }
}

//! Wire types for the knowledge base REST API.
//!
//! The service speaks camelCase JSON; these types convert to and from the
//! crate-neutral types in `atrium_core::models::knowledge`.

use serde::{Deserialize, Serialize};

use atrium_core::{
    AnswerPrompt, KbEntry, KbEntryUpdate, KbFile, KbQuery, KbUpdate, MetadataPair,
    OperationHandle, OperationState, ScoredAnswer,
};

// =============================================================================
// UPDATE TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDto {
    pub name: String,
    pub value: String,
}

impl From<&MetadataPair> for MetadataDto {
    fn from(pair: &MetadataPair) -> Self {
        Self {
            name: pair.name.clone(),
            value: pair.value.clone(),
        }
    }
}

impl From<MetadataDto> for MetadataPair {
    fn from(dto: MetadataDto) -> Self {
        MetadataPair::new(dto.name, dto.value)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDto {
    pub file_name: String,
    pub file_uri: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddSection {
    pub files: Vec<FileDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataEdit {
    pub add: Vec<MetadataDto>,
    pub delete: Vec<MetadataDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QnaUpdateDto {
    pub id: i64,
    pub metadata: MetadataEdit,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSection {
    pub qna_list: Vec<QnaUpdateDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteSection {
    pub sources: Vec<String>,
}

/// Body of the PATCH that adds, updates and deletes in one operation.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateKbRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add: Option<AddSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<DeleteSection>,
}

impl From<&KbUpdate> for UpdateKbRequest {
    fn from(update: &KbUpdate) -> Self {
        let add = (!update.add.is_empty()).then(|| AddSection {
            files: update.add.iter().map(FileDto::from).collect(),
        });
        let edits = (!update.update.is_empty()).then(|| UpdateSection {
            qna_list: update.update.iter().map(QnaUpdateDto::from).collect(),
        });
        let delete = (!update.delete.is_empty()).then(|| DeleteSection {
            sources: update.delete.clone(),
        });
        Self {
            add,
            update: edits,
            delete,
        }
    }
}

impl From<&KbFile> for FileDto {
    fn from(file: &KbFile) -> Self {
        Self {
            file_name: file.file_name.clone(),
            file_uri: file.file_uri.clone(),
        }
    }
}

impl From<&KbEntryUpdate> for QnaUpdateDto {
    fn from(entry: &KbEntryUpdate) -> Self {
        Self {
            id: entry.id,
            metadata: MetadataEdit {
                add: entry.add_metadata.iter().map(MetadataDto::from).collect(),
                delete: entry.delete_metadata.iter().map(MetadataDto::from).collect(),
            },
        }
    }
}

// =============================================================================
// OPERATION TYPES
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Long-running operation as reported by the service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDto {
    pub operation_id: String,
    pub operation_state: String,
    #[serde(default)]
    pub error_response: Option<ErrorResponse>,
}

impl From<OperationDto> for OperationHandle {
    fn from(dto: OperationDto) -> Self {
        // NotStarted is reported until the service picks the operation up.
        let state = match dto.operation_state.as_str() {
            "Succeeded" => OperationState::Succeeded,
            "Failed" => OperationState::Failed,
            _ => OperationState::Running,
        };
        let error = dto.error_response.map(|r| match r.error.target {
            Some(target) if !target.is_empty() => format!("{} ({})", r.error.message, target),
            _ => r.error.message,
        });
        OperationHandle {
            operation_id: dto.operation_id,
            state,
            error,
        }
    }
}

// =============================================================================
// DOWNLOAD TYPES
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct QnaDocumentDto {
    pub id: i64,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataDto>,
}

impl From<QnaDocumentDto> for KbEntry {
    fn from(dto: QnaDocumentDto) -> Self {
        KbEntry {
            id: dto.id,
            answer: dto.answer,
            source: dto.source,
            questions: dto.questions,
            metadata: dto.metadata.into_iter().map(MetadataPair::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnaDocumentsResponse {
    #[serde(default)]
    pub qna_documents: Vec<QnaDocumentDto>,
}

// =============================================================================
// ANSWER TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAnswerRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qna_id: Option<String>,
    pub top: u32,
    pub score_threshold: f64,
    pub strict_filters: Vec<MetadataDto>,
    pub is_test: bool,
}

impl From<&KbQuery> for GenerateAnswerRequest {
    fn from(query: &KbQuery) -> Self {
        let (question, qna_id) = match &query.direct_id {
            Some(id) if !id.is_empty() => (None, Some(id.clone())),
            _ => (Some(query.question.clone()), None),
        };
        Self {
            question,
            qna_id,
            top: query.top,
            score_threshold: query.score_threshold,
            strict_filters: query.filters.iter().map(MetadataDto::from).collect(),
            is_test: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDto {
    #[serde(default)]
    pub display_order: i32,
    pub qna_id: i64,
    #[serde(default)]
    pub display_text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerContextDto {
    #[serde(default)]
    pub prompts: Vec<PromptDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerDto {
    pub id: i64,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataDto>,
    #[serde(default)]
    pub context: Option<AnswerContextDto>,
}

impl From<AnswerDto> for ScoredAnswer {
    fn from(dto: AnswerDto) -> Self {
        ScoredAnswer {
            id: dto.id,
            answer: dto.answer,
            score: dto.score,
            questions: dto.questions,
            source: dto.source.unwrap_or_default(),
            metadata: dto.metadata.into_iter().map(MetadataPair::from).collect(),
            prompts: dto
                .context
                .unwrap_or_default()
                .prompts
                .into_iter()
                .map(|p| AnswerPrompt {
                    display_order: p.display_order,
                    qna_id: p.qna_id,
                    display_text: p.display_text,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateAnswerResponse {
    #[serde(default)]
    pub answers: Vec<AnswerDto>,
}

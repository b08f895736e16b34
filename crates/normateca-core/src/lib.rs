//! Canonical document model, row normalization, filtering, and statistics.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "normateca-core";

/// Canonical targets for known spreadsheet header labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    Status,
    Codigo,
    Tipo,
    Numero,
    Titulo,
    Epigrafe,
    Id,
    Assunto,
    Orgao,
    SetorResponsavel,
    DataDocumento,
    LinkAcesso,
    NivelAcesso,
    LocalArquivo,
    Observacao,
    TipoSigla,
    CodSiorg,
    OrgaoSigla,
}

impl DocumentField {
    /// Maps a header label (case-insensitive) to its canonical field.
    /// Unknown labels return `None`; they are kept under their literal name.
    pub fn from_header(header: &str) -> Option<Self> {
        match header.trim().to_lowercase().as_str() {
            "status" => Some(Self::Status),
            "código" => Some(Self::Codigo),
            "tipo" => Some(Self::Tipo),
            "número" => Some(Self::Numero),
            "título" => Some(Self::Titulo),
            "epígrafe" => Some(Self::Epigrafe),
            "id" => Some(Self::Id),
            "assunto" => Some(Self::Assunto),
            "orgão ou unidade" => Some(Self::Orgao),
            "setor responsável" => Some(Self::SetorResponsavel),
            "data (documento)" => Some(Self::DataDocumento),
            "link de acesso" => Some(Self::LinkAcesso),
            "nível de acesso" => Some(Self::NivelAcesso),
            "local do arquivo" => Some(Self::LocalArquivo),
            "observação" => Some(Self::Observacao),
            "tipo (sigla)" => Some(Self::TipoSigla),
            "codsiorg" => Some(Self::CodSiorg),
            "orgão ou unidade (sigla)" => Some(Self::OrgaoSigla),
            _ => None,
        }
    }
}

/// One institutional document, derived from one spreadsheet row. Wire names
/// follow the source system's casing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub status: String,
    pub codigo: String,
    pub tipo: String,
    pub numero: String,
    pub titulo: String,
    pub epigrafe: String,
    pub assunto: String,
    pub orgao: String,
    pub setor_responsavel: String,
    pub data_documento: String,
    pub link_acesso: String,
    pub nivel_acesso: String,
    pub local_arquivo: String,
    pub observacao: String,
    pub tipo_sigla: String,
    #[serde(rename = "codSIORG")]
    pub cod_siorg: String,
    pub orgao_sigla: String,
    pub setores_array: Vec<String>,
    /// Columns with no canonical mapping, keyed by their literal header label.
    #[serde(flatten)]
    pub extras: BTreeMap<String, String>,
}

impl Document {
    fn set(&mut self, field: DocumentField, value: String) {
        match field {
            DocumentField::Status => self.status = value,
            DocumentField::Codigo => self.codigo = value,
            DocumentField::Tipo => self.tipo = value,
            DocumentField::Numero => self.numero = value,
            DocumentField::Titulo => self.titulo = value,
            DocumentField::Epigrafe => self.epigrafe = value,
            DocumentField::Id => self.id = value,
            DocumentField::Assunto => self.assunto = value,
            DocumentField::Orgao => self.orgao = value,
            DocumentField::SetorResponsavel => self.setor_responsavel = value,
            DocumentField::DataDocumento => self.data_documento = value,
            DocumentField::LinkAcesso => self.link_acesso = value,
            DocumentField::NivelAcesso => self.nivel_acesso = value,
            DocumentField::LocalArquivo => self.local_arquivo = value,
            DocumentField::Observacao => self.observacao = value,
            DocumentField::TipoSigla => self.tipo_sigla = value,
            DocumentField::CodSiorg => self.cod_siorg = value,
            DocumentField::OrgaoSigla => self.orgao_sigla = value,
        }
    }
}

/// Splits the raw responsible-sector cell on `,` and `;`, trimming entries
/// and dropping empties.
pub fn split_sectors(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Converts one data row into a [`Document`]. Cells missing at the tail of
/// the row are empty strings; a blank id becomes `sheet_{row_index + 1}`.
/// Never fails.
pub fn normalize_row(headers: &[String], row: &[String], row_index: usize) -> Document {
    let mut doc = Document::default();
    for (col, header) in headers.iter().enumerate() {
        let value = row.get(col).cloned().unwrap_or_default();
        match DocumentField::from_header(header) {
            Some(field) => doc.set(field, value),
            None => {
                doc.extras.insert(header.clone(), value);
            }
        }
    }
    if doc.id.is_empty() {
        doc.id = format!("sheet_{}", row_index + 1);
    }
    doc.setores_array = split_sectors(&doc.setor_responsavel);
    doc
}

/// Drops documents whose id was already seen, keeping the first occurrence
/// and the relative order.
pub fn unique_by_id(documents: &[Document]) -> Vec<Document> {
    let mut seen = HashSet::new();
    documents
        .iter()
        .filter(|doc| seen.insert(doc.id.as_str()))
        .cloned()
        .collect()
}

/// Optional substring criteria combined with logical AND. Absent or empty
/// parameters impose no constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    pub setor: Option<String>,
    pub tipo: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
}

impl SearchFilter {
    fn active(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(str::to_lowercase)
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(setor) = Self::active(&self.setor) {
            if !doc
                .setores_array
                .iter()
                .any(|s| s.to_lowercase().contains(&setor))
            {
                return false;
            }
        }
        if let Some(tipo) = Self::active(&self.tipo) {
            if !doc.tipo.to_lowercase().contains(&tipo) {
                return false;
            }
        }
        if let Some(status) = Self::active(&self.status) {
            if !doc.status.to_lowercase().contains(&status) {
                return false;
            }
        }
        if let Some(search) = Self::active(&self.search) {
            let hit = [&doc.titulo, &doc.assunto, &doc.epigrafe, &doc.orgao]
                .iter()
                .any(|field| field.to_lowercase().contains(&search));
            if !hit {
                return false;
            }
        }
        true
    }

    /// Filters the search view, preserving its order.
    pub fn apply(&self, documents: &[Document]) -> Vec<Document> {
        documents
            .iter()
            .filter(|doc| self.matches(doc))
            .cloned()
            .collect()
    }
}

/// Grouped counts over the unique-documents view. Empty field values never
/// produce a bucket; one document may land in several sector buckets but
/// exactly one status/tipo/orgao bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub total: usize,
    pub by_status: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub by_orgao: BTreeMap<String, u64>,
    pub by_setor: BTreeMap<String, u64>,
}

impl DocumentStats {
    pub fn collect(documents: &[Document]) -> Self {
        let mut stats = Self {
            total: documents.len(),
            ..Self::default()
        };
        for doc in documents {
            if !doc.status.is_empty() {
                *stats.by_status.entry(doc.status.clone()).or_default() += 1;
            }
            if !doc.tipo.is_empty() {
                *stats.by_type.entry(doc.tipo.clone()).or_default() += 1;
            }
            if !doc.orgao.is_empty() {
                *stats.by_orgao.entry(doc.orgao.clone()).or_default() += 1;
            }
            for setor in &doc.setores_array {
                *stats.by_setor.entry(setor.clone()).or_default() += 1;
            }
        }
        stats
    }

    pub fn most_common_status(&self) -> Option<&str> {
        most_common(&self.by_status)
    }

    pub fn most_common_type(&self) -> Option<&str> {
        most_common(&self.by_type)
    }

    pub fn distinct_sectors(&self) -> usize {
        self.by_setor.len()
    }
}

// Highest count wins; ties resolve to the lexicographically smallest key.
fn most_common(counts: &BTreeMap<String, u64>) -> Option<&str> {
    let mut best: Option<(&str, u64)> = None;
    for (key, &count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((key, count)),
        }
    }
    best.map(|(key, _)| key)
}

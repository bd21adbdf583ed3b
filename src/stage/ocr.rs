use serde::{Deserialize, Serialize};

use crate::imaging::raster::DecodedImage;
use crate::stage::{OcrExtract, StageError};

/// Closed set of document-type labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Passport,
    DriversLicense,
    NationalId,
    IdCard,
    PanCard,
    Other,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Passport => "passport",
            DocumentKind::DriversLicense => "drivers_license",
            DocumentKind::NationalId => "national_id",
            DocumentKind::IdCard => "id_card",
            DocumentKind::PanCard => "pan_card",
            DocumentKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
}

/// Structured fields. The wire contract is exactly these nine keys, with
/// null for anything the document did not yield.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrFields {
    pub full_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub document_number: Option<String>,
    pub nationality: Option<String>,
    pub issue_date: Option<String>,
    pub expiry_date: Option<String>,
    pub place_of_birth: Option<String>,
    pub address: Option<String>,
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub document_type: DocumentKind,
    pub extracted_text: String,
    pub confidence: f32,
    pub fields: OcrFields,
}

#[derive(Debug, Clone)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f32,
}

/// Seam for the actual text-recognition backend.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn recognize(&self, image: &DecodedImage) -> Result<RecognizedText, StageError>;
}

/// Built-in placeholder backend. Glyph recognition needs a real OCR engine
/// plugged in behind [`TextRecognizer`]; until one is wired up, every
/// raster yields empty text at zero confidence.
pub struct NullRecognizer;

impl TextRecognizer for NullRecognizer {
    fn name(&self) -> &'static str {
        "null-recognizer"
    }

    fn recognize(&self, _image: &DecodedImage) -> Result<RecognizedText, StageError> {
        Ok(RecognizedText { text: String::new(), confidence: 0.0 })
    }
}

/// OCR stage: recognizer backend plus the free-text field parser. Never
/// fails a request for low confidence; it returns its best effort.
pub struct DocumentOcrStage {
    recognizer: Box<dyn TextRecognizer>,
}

impl DocumentOcrStage {
    pub fn new(recognizer: Box<dyn TextRecognizer>) -> Self {
        DocumentOcrStage { recognizer }
    }
}

impl OcrExtract for DocumentOcrStage {
    fn name(&self) -> &'static str {
        self.recognizer.name()
    }

    fn extract(&self, image: &DecodedImage) -> Result<OcrOutcome, StageError> {
        let recognized = self.recognizer.recognize(image)?;
        let (document_type, fields) = parse_document_text(&recognized.text);

        Ok(OcrOutcome {
            document_type,
            extracted_text: recognized.text,
            confidence: recognized.confidence.clamp(0.0, 1.0),
            fields,
        })
    }
}

pub fn detect_document_type(text: &str) -> DocumentKind {
    let upper = text.to_uppercase();

    if ["PASSPORT", "PASSEPORT", "PASSAPORTE", "REISEPASS"].iter().any(|w| upper.contains(w)) {
        return DocumentKind::Passport;
    }

    if ["DRIVING", "DRIVER", "FUHRERSCHEIN", "FÜHRERSCHEIN", "LICENCIA"]
        .iter()
        .any(|w| upper.contains(w))
    {
        return DocumentKind::DriversLicense;
    }

    if ["PAN CARD", "INCOME TAX", "PERMANENT ACCOUNT"].iter().any(|w| upper.contains(w)) {
        return DocumentKind::PanCard;
    }

    if ["DNI", "NATIONAL", "PERSONALAUSWEIS", "CIDADAO", "CIDADÃO"]
        .iter()
        .any(|w| upper.contains(w))
    {
        return DocumentKind::NationalId;
    }

    if ["IDENTITY", "ID CARD", "CARTE", "CARTÃO"].iter().any(|w| upper.contains(w)) {
        return DocumentKind::IdCard;
    }

    DocumentKind::Other
}

/// Maps recognized free text onto the nine-key field contract. Labeled
/// values win; MRZ lines fill in whatever is still missing (and supersede
/// the document number on passports).
pub fn parse_document_text(text: &str) -> (DocumentKind, OcrFields) {
    let document_type = detect_document_type(text);
    let mut fields = OcrFields::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if fields.full_name.is_none() {
            fields.full_name = labeled_value(line, &["FULL NAME", "NAME", "NOMBRE", "NOM"]);
        }
        if fields.date_of_birth.is_none() {
            if let Some(value) =
                labeled_value(line, &["DATE OF BIRTH", "DOB", "GEBURTSDATUM", "NACIMIENTO", "BIRTH"])
            {
                fields.date_of_birth = find_date(&value).or(Some(value));
            }
        }
        if fields.document_number.is_none() {
            if let Some(value) = labeled_value(
                line,
                &[
                    "DOCUMENT NO",
                    "DOCUMENT NUMBER",
                    "PASSPORT NO",
                    "LICENCE NO",
                    "LICENSE NO",
                    "CARD NO",
                    "NO.",
                ],
            ) {
                fields.document_number = identifier_token(&value);
            }
        }
        if fields.nationality.is_none() {
            fields.nationality =
                labeled_value(line, &["NATIONALITY", "NATIONALITE", "NACIONALIDAD"]);
        }
        if fields.issue_date.is_none() {
            if let Some(value) = labeled_value(line, &["DATE OF ISSUE", "ISSUE DATE", "ISSUED"]) {
                fields.issue_date = find_date(&value).or(Some(value));
            }
        }
        if fields.expiry_date.is_none() {
            if let Some(value) =
                labeled_value(line, &["DATE OF EXPIRY", "EXPIRY DATE", "EXPIRY", "EXPIRES", "VALID UNTIL"])
            {
                fields.expiry_date = find_date(&value).or(Some(value));
            }
        }
        if fields.place_of_birth.is_none() {
            fields.place_of_birth = labeled_value(line, &["PLACE OF BIRTH", "BIRTHPLACE"]);
        }
        if fields.address.is_none() {
            fields.address = labeled_value(line, &["ADDRESS", "DOMICILIO"]);
        }
        if fields.gender.is_none() {
            if let Some(value) = labeled_value(line, &["SEX", "GENDER"]) {
                fields.gender = normalize_gender(&value);
            }
        }
    }

    apply_mrz(text, document_type, &mut fields);

    (document_type, fields)
}

fn labeled_value(line: &str, labels: &[&str]) -> Option<String> {
    for label in labels {
        if let Some(pos) = find_ascii_label(line, label) {
            let rest = &line[pos + label.len()..];
            let value = rest.trim_start_matches([':', '.', '-', ' ']).trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

// Case-insensitive ASCII search. Labels are ASCII, so a hit is always on a
// char boundary even when the surrounding text is not.
fn find_ascii_label(line: &str, label: &str) -> Option<usize> {
    let line_bytes = line.as_bytes();
    let label_bytes = label.as_bytes();
    if label_bytes.len() > line_bytes.len() {
        return None;
    }

    (0..=line_bytes.len() - label_bytes.len())
        .find(|&i| line_bytes[i..i + label_bytes.len()].eq_ignore_ascii_case(label_bytes))
}

// First date-shaped token: dd.mm.yyyy, dd/mm/yyyy, dd-mm-yyyy or yyyy-mm-dd.
pub fn find_date(value: &str) -> Option<String> {
    for token in value.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        let parts: Vec<&str> = token.split(['.', '/', '-']).collect();
        if parts.len() != 3 {
            continue;
        }
        if !parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
            continue;
        }

        let lens = (parts[0].len(), parts[1].len(), parts[2].len());
        let day_first = lens.0 <= 2 && lens.1 <= 2 && lens.2 == 4;
        let year_first = lens.0 == 4 && lens.1 <= 2 && lens.2 <= 2;
        if day_first || year_first {
            return Some(token.to_string());
        }
    }

    None
}

fn identifier_token(value: &str) -> Option<String> {
    value
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
        .find(|t| t.len() >= 5 && t.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|t| t.to_string())
}

fn normalize_gender(value: &str) -> Option<Gender> {
    let upper = value.trim().to_uppercase();
    if upper.starts_with('M') {
        return Some(Gender::M);
    }
    if upper.starts_with('F') {
        return Some(Gender::F);
    }
    None
}

fn is_mrz_line(line: &str) -> bool {
    line.len() >= 30 && line.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '<')
}

fn apply_mrz(text: &str, document_type: DocumentKind, fields: &mut OcrFields) {
    let mrz: Vec<&str> = text.lines().map(str::trim).filter(|l| is_mrz_line(l)).collect();
    if mrz.len() < 2 {
        return;
    }

    // TD-3 layout: names line first, data line second.
    let line1 = mrz[0];
    let line2 = mrz[1];

    if line1.starts_with("P<") && fields.full_name.is_none() {
        let names = &line1[5.min(line1.len())..];
        let mut parts = names.splitn(2, "<<");
        let surname = parts.next().unwrap_or("").replace('<', " ");
        let given = parts.next().unwrap_or("").replace('<', " ");
        let full = format!("{} {}", given.trim(), surname.trim());
        let full = full.trim().to_string();
        if !full.is_empty() {
            fields.full_name = Some(full);
        }
    }

    if line2.len() >= 28 {
        let number = line2[..9].trim_end_matches('<');
        if !number.is_empty()
            && (fields.document_number.is_none() || document_type == DocumentKind::Passport)
        {
            fields.document_number = Some(number.to_string());
        }

        if fields.nationality.is_none() {
            let nationality = line2[10..13].trim_end_matches('<');
            if nationality.len() == 3 {
                fields.nationality = Some(nationality.to_string());
            }
        }

        if fields.date_of_birth.is_none() {
            fields.date_of_birth = mrz_date(&line2[13..19]);
        }

        if fields.gender.is_none() {
            fields.gender = normalize_gender(&line2[20..21]);
        }

        if fields.expiry_date.is_none() && line2.len() >= 27 {
            fields.expiry_date = mrz_date(&line2[21..27]);
        }
    }
}

// YYMMDD with a century pivot: years above 30 read as 19xx.
fn mrz_date(raw: &str) -> Option<String> {
    if raw.len() != 6 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let yy: u32 = raw[..2].parse().ok()?;
    let mm = &raw[2..4];
    let dd = &raw[4..6];
    let century = if yy > 30 { 1900 } else { 2000 };

    Some(format!("{}-{}-{}", century + yy, mm, dd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_document_type() {
        assert_eq!(detect_document_type("REISEPASS Bundesrepublik"), DocumentKind::Passport);
        assert_eq!(detect_document_type("DRIVING LICENCE"), DocumentKind::DriversLicense);
        assert_eq!(detect_document_type("INCOME TAX DEPARTMENT"), DocumentKind::PanCard);
        assert_eq!(detect_document_type("DNI 12345678"), DocumentKind::NationalId);
        assert_eq!(detect_document_type("NATIONAL IDENTITY"), DocumentKind::NationalId);
        assert_eq!(detect_document_type("ID CARD"), DocumentKind::IdCard);
        assert_eq!(detect_document_type("utility bill"), DocumentKind::Other);
    }

    #[test]
    fn test_parse_labeled_fields() {
        let text = "PASSPORT\n\
                    Name: Jane Smith\n\
                    Date of Birth: 15.03.1985\n\
                    Passport No: C01X00T47\n\
                    Nationality: German\n\
                    Date of Issue: 01.02.2020\n\
                    Date of Expiry: 01.02.2030\n\
                    Place of Birth: Berlin\n\
                    Sex: F";

        let (kind, fields) = parse_document_text(text);
        assert_eq!(kind, DocumentKind::Passport);
        assert_eq!(fields.full_name.as_deref(), Some("Jane Smith"));
        assert_eq!(fields.date_of_birth.as_deref(), Some("15.03.1985"));
        assert_eq!(fields.document_number.as_deref(), Some("C01X00T47"));
        assert_eq!(fields.nationality.as_deref(), Some("German"));
        assert_eq!(fields.issue_date.as_deref(), Some("01.02.2020"));
        assert_eq!(fields.expiry_date.as_deref(), Some("01.02.2030"));
        assert_eq!(fields.place_of_birth.as_deref(), Some("Berlin"));
        assert_eq!(fields.gender, Some(Gender::F));
        assert!(fields.address.is_none());
    }

    #[test]
    fn test_parse_mrz_lines() {
        let text = "PASSPORT\n\
                    P<CHESAMPLE<<SCHWEIZER<<<<<<<<<<<<<<<<<<<<<<\n\
                    S0A00A92<0CHE8501155F3002011<<<<<<<<<<<<<<04";

        let (kind, fields) = parse_document_text(text);
        assert_eq!(kind, DocumentKind::Passport);
        assert_eq!(fields.document_number.as_deref(), Some("S0A00A92"));
        assert_eq!(fields.nationality.as_deref(), Some("CHE"));
        assert_eq!(fields.date_of_birth.as_deref(), Some("1985-01-15"));
        assert_eq!(fields.gender, Some(Gender::F));
        assert_eq!(fields.expiry_date.as_deref(), Some("2030-02-01"));
    }

    #[test]
    fn test_unlabeled_text_yields_nulls() {
        let (kind, fields) = parse_document_text("lorem ipsum dolor");
        assert_eq!(kind, DocumentKind::Other);
        assert_eq!(fields, OcrFields::default());
    }

    #[test]
    fn test_fields_serialize_exactly_nine_keys() {
        let json = serde_json::to_value(OcrFields::default()).unwrap();
        let map = json.as_object().unwrap();
        assert_eq!(map.len(), 9);
        for key in [
            "full_name",
            "date_of_birth",
            "document_number",
            "nationality",
            "issue_date",
            "expiry_date",
            "place_of_birth",
            "address",
            "gender",
        ] {
            assert!(map.contains_key(key), "missing key {key}");
            assert!(map[key].is_null());
        }
    }

    #[test]
    fn test_gender_serializes_as_single_letter() {
        let fields = OcrFields { gender: Some(Gender::M), ..OcrFields::default() };
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["gender"], "M");
    }

    #[test]
    fn test_find_date() {
        assert_eq!(find_date("born 15/03/1985 in Berlin").as_deref(), Some("15/03/1985"));
        assert_eq!(find_date("1990-01-02").as_deref(), Some("1990-01-02"));
        assert_eq!(find_date("no date here"), None);
    }

    #[test]
    fn test_stage_is_best_effort() {
        use crate::stage::testsupport::blank_image;

        let stage = DocumentOcrStage::new(Box::new(NullRecognizer));
        let outcome = stage.extract(&blank_image(64, 64)).unwrap();
        assert_eq!(outcome.document_type, DocumentKind::Other);
        assert_eq!(outcome.confidence, 0.0);
        assert!(outcome.extracted_text.is_empty());
    }
}

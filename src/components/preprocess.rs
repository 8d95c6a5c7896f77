//! Text normalisation: case folding, accent folding, and replacement of
//! URLs, e-mail addresses, phone numbers, numbers, currency symbols,
//! contractions, and punctuation.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::component::{component_id, Component, ParamKind, ParamSpec, ParamsExt};
use crate::models::Params;
use crate::pipeline::Env;
use crate::stream::{map_documents, DocStream};

static URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:https?://|ftp://|www\.)[^\s<>]+").expect("valid regex")
});
static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[\w.+-]+@[\w-]+(?:\.[\w-]+)+\b").expect("valid regex")
});
static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)|\b\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b")
        .expect("valid regex")
});
static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[+-]?\b\d+(?:[.,]\d+)*\b").expect("valid regex"));
static CONTRACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\w+)(n't|'ll|'re|'ve|'m|'d)\b").expect("valid regex")
});
static SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Boolean flags in processing order, with their defaults.
const FLAGS: [(&str, &str, bool); 10] = [
    ("lowercase", "Lowercase", false),
    ("transliterate", "Transliterate", true),
    ("no_urls", "No URLs", true),
    ("no_emails", "No emails", true),
    ("no_phone_numbers", "No phone numbers", true),
    ("no_numbers", "No numbers", true),
    ("no_currency_symbols", "No currency symbols", true),
    ("no_contractions", "No contractions", true),
    ("no_punct", "No punctuation", true),
    ("no_accents", "No accents", true),
];

/// Resolved preprocessing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub lowercase: bool,
    pub no_urls: bool,
    pub no_emails: bool,
    pub no_phone_numbers: bool,
    pub no_numbers: bool,
    pub no_currency_symbols: bool,
    pub no_contractions: bool,
    pub no_punct: bool,
    pub no_accents: bool,
}

impl Options {
    pub fn from_params(params: &Params) -> Self {
        let flag = |name: &str| {
            let default = FLAGS
                .iter()
                .find(|(n, _, _)| *n == name)
                .map(|(_, _, d)| *d)
                .unwrap_or(false);
            params.bool_or(name, default)
        };
        Self {
            lowercase: flag("lowercase"),
            no_urls: flag("no_urls"),
            no_emails: flag("no_emails"),
            no_phone_numbers: flag("no_phone_numbers"),
            no_numbers: flag("no_numbers"),
            no_currency_symbols: flag("no_currency_symbols"),
            no_contractions: flag("no_contractions"),
            no_punct: flag("no_punct"),
            no_accents: flag("transliterate") || flag("no_accents"),
        }
    }
}

pub struct Preprocess {
    id: String,
}

impl Preprocess {
    pub fn new() -> Self {
        Self {
            id: component_id(module_path!(), "process"),
        }
    }
}

impl Default for Preprocess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for Preprocess {
    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        "Text preprocessing"
    }

    fn schema(&self) -> Vec<ParamSpec> {
        FLAGS
            .iter()
            .map(|(name, title, default)| ParamSpec::new(name, title, ParamKind::Bool, *default))
            .collect()
    }

    async fn transform(&self, content: DocStream, _env: &Env, params: &Params) -> Result<DocStream> {
        let options = Options::from_params(params);
        Ok(map_documents(content, "preprocess", move |doc| {
            Ok(doc.with_text(preprocess_text(&doc.text, &options)))
        }))
    }
}

pub fn preprocess_text(text: &str, options: &Options) -> String {
    let mut text = text.to_string();
    if options.lowercase {
        text = text.to_lowercase();
    }
    if options.no_accents {
        text = text.chars().map(fold_accent).collect();
    }
    if options.no_urls {
        text = URL.replace_all(&text, "URL").into_owned();
    }
    if options.no_emails {
        text = EMAIL.replace_all(&text, "EMAIL").into_owned();
    }
    if options.no_phone_numbers {
        text = PHONE.replace_all(&text, "PHONE").into_owned();
    }
    if options.no_numbers {
        text = NUMBER.replace_all(&text, "NUMBER").into_owned();
    }
    if options.no_currency_symbols {
        text = text
            .chars()
            .map(|c| match currency_code(c) {
                Some(code) => format!("{} ", code),
                None => c.to_string(),
            })
            .collect();
    }
    if options.no_contractions {
        text = CONTRACTION
            .replace_all(&text, |caps: &Captures| expand_contraction(&caps[1], &caps[2]))
            .into_owned();
    }
    if options.no_punct {
        text = text
            .chars()
            .map(|c| if is_punct(c) { ' ' } else { c })
            .collect();
    }
    SPACE.replace_all(&text, " ").trim().to_string()
}

fn expand_contraction(stem: &str, suffix: &str) -> String {
    let lower = suffix.to_ascii_lowercase();
    match lower.as_str() {
        "n't" => match stem.to_ascii_lowercase().as_str() {
            "wo" => format!("{}ill not", &stem[..1]),
            "ca" => format!("{}n not", stem),
            "sha" => format!("{}ll not", stem),
            _ => format!("{} not", stem),
        },
        "'ll" => format!("{} will", stem),
        "'re" => format!("{} are", stem),
        "'ve" => format!("{} have", stem),
        "'m" => format!("{} am", stem),
        "'d" => format!("{} would", stem),
        _ => format!("{}{}", stem, suffix),
    }
}

fn currency_code(c: char) -> Option<&'static str> {
    Some(match c {
        '$' => "USD",
        '€' => "EUR",
        '£' => "GBP",
        '¥' => "JPY",
        '₹' => "INR",
        '₽' => "RUB",
        '₩' => "KRW",
        '₺' => "TRY",
        '₪' => "ILS",
        '฿' => "THB",
        '₫' => "VND",
        '₴' => "UAH",
        '₱' => "PHP",
        '₦' => "NGN",
        '¢' => "USD",
        _ => return None,
    })
}

fn is_punct(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '‘' | '’' | '“' | '”' | '«' | '»' | '–' | '—' | '…' | '¡' | '¿' | '·' | '„' | '‹' | '›'
        )
}

/// Closest unaccented Latin letter.
fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'Ç' | 'Ć' | 'Ĉ' | 'Ċ' | 'Č' => 'C',
        'ď' | 'đ' => 'd',
        'Ď' | 'Đ' => 'D',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => 'G',
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => 'I',
        'ķ' => 'k',
        'Ķ' => 'K',
        'ĺ' | 'ļ' | 'ľ' | 'ł' => 'l',
        'Ĺ' | 'Ļ' | 'Ľ' | 'Ł' => 'L',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => 'N',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ŏ' | 'Ő' => 'O',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'Ŕ' | 'Ŗ' | 'Ř' => 'R',
        'ś' | 'ŝ' | 'ş' | 'š' | 'ș' => 's',
        'Ś' | 'Ŝ' | 'Ş' | 'Š' | 'Ș' => 'S',
        'ţ' | 'ť' | 'ț' => 't',
        'Ţ' | 'Ť' | 'Ț' => 'T',
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' | 'Ÿ' => 'Y',
        'ź' | 'ż' | 'ž' => 'z',
        'Ź' | 'Ż' | 'Ž' => 'Z',
        other => other,
    }
}

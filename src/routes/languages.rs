use actix_web::{HttpResponse, Responder, get};
use serde::{Deserialize, Serialize};

use crate::engine::Language;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct LanguageInfo {
    pub name: String,
    pub aliases: Vec<String>,
    pub compiled: bool,
}

impl From<Language> for LanguageInfo {
    fn from(language: Language) -> Self {
        Self {
            name: language.name().to_string(),
            aliases: language.aliases().iter().map(|a| a.to_string()).collect(),
            compiled: language.is_compiled(),
        }
    }
}

#[get("/languages")]
pub async fn languages_handler() -> impl Responder {
    let languages: Vec<LanguageInfo> = Language::ALL.into_iter().map(LanguageInfo::from).collect();
    HttpResponse::Ok().json(languages)
}

// src/common/i18n.rs

use std::collections::HashMap;

const DEFAULT_LANG: &str = "fr";

// Catálogos embutidos no binário. Um arquivo plano "chave -> mensagem" por idioma.
const CATALOGS: &[(&str, &str)] = &[
    ("fr", include_str!("../../locales/fr.json")),
    ("en", include_str!("../../locales/en.json")),
    ("pt", include_str!("../../locales/pt.json")),
];

#[derive(Debug, Clone)]
pub struct I18nStore {
    catalogs: HashMap<String, HashMap<String, String>>,
}

impl I18nStore {
    pub fn load() -> anyhow::Result<Self> {
        let mut catalogs = HashMap::new();
        for (lang, raw) in CATALOGS {
            let messages: HashMap<String, String> = serde_json::from_str(raw)
                .map_err(|e| anyhow::anyhow!("Catálogo '{}' inválido: {}", lang, e))?;
            catalogs.insert(lang.to_string(), messages);
        }
        Ok(Self { catalogs })
    }

    /// Busca a mensagem no idioma pedido, cai para o francês e, por último, devolve a própria chave.
    /// Parâmetros `{nome}` são substituídos pelos valores informados.
    pub fn translate(&self, lang: &str, key: &str, params: &[(&str, &str)]) -> String {
        let template = self
            .lookup(lang, key)
            .or_else(|| self.lookup(DEFAULT_LANG, key))
            .unwrap_or(key);

        params
            .iter()
            .fold(template.to_string(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
    }

    fn lookup(&self, lang: &str, key: &str) -> Option<&str> {
        self.catalogs
            .get(lang)
            .and_then(|messages| messages.get(key))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_has_the_same_keys() {
        let store = I18nStore::load().unwrap();
        let reference = &store.catalogs[DEFAULT_LANG];
        for (lang, messages) in &store.catalogs {
            for key in reference.keys() {
                assert!(messages.contains_key(key), "'{}' sem a chave '{}'", lang, key);
            }
        }
    }

    #[test]
    fn falls_back_to_french_then_to_key() {
        let store = I18nStore::load().unwrap();
        assert_eq!(
            store.translate("de", "slot_unavailable", &[]),
            store.translate("fr", "slot_unavailable", &[])
        );
        assert_eq!(store.translate("fr", "no.such.key", &[]), "no.such.key");
    }

    #[test]
    fn replaces_named_parameters() {
        let store = I18nStore::load().unwrap();
        let msg = store.translate("pt", "transition.too_late_to_reschedule", &[("hours", "48")]);
        assert!(msg.contains("48"));
        assert!(!msg.contains("{hours}"));
    }
}

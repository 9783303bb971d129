//! Language code tables.
//!
//! Two independent vocabularies: native display names used when building
//! model prompts, and the Baidu translation API's own language codes.

/// Native display name for `code`, used inside model prompts.
/// Falls back to the code itself when unmapped.
pub fn display_name(code: &str) -> String {
    let name = match code {
        "zh" => "中文",
        "en" => "English",
        "ja" => "日本語",
        "ko" => "한국어",
        "fr" => "Français",
        "de" => "Deutsch",
        "es" => "Español",
        "ru" => "Русский",
        "ar" => "العربية",
        "it" => "Italiano",
        "pt" => "Português",
        "nl" => "Nederlands",
        "pl" => "Polski",
        "vi" => "Tiếng Việt",
        "th" => "ไทย",
        "tr" => "Türkçe",
        "he" => "עברית",
        "hi" => "हिन्दी",
        "cs" => "Čeština",
        "uk" => "Українська",
        "id" => "Bahasa Indonesia",
        "ms" => "Bahasa Melayu",
        "tl" => "Filipino",
        "bn" => "বাংলা",
        "ta" => "தமிழ்",
        "te" => "తెలుగు",
        "mr" => "मराठी",
        "gu" => "ગુજરાતી",
        "kn" => "ಕನ್ನಡ",
        "ml" => "മലയാളം",
        "si" => "සිංහල",
        "my" => "မြန်မာဘာသာ",
        "km" => "ភាសាខ្មែរ",
        "lo" => "ລາວ",
        "fa" => "فارسی",
        "ur" => "اردو",
        "pa" => "ਪੰਜਾਬੀ",
        "kk" => "Қазақ тілі",
        "uz" => "O'zbek tili",
        "mn" => "Монгол хэл",
        "bo" => "བོད་སྐད།",
        "ug" => "ئۇيغۇر تىلى",
        "yue" => "粵語",
        "zh-Hant" => "繁體中文",
        _ => return code.to_string(),
    };
    name.to_string()
}

/// Baidu code for `code`, if the API knows the language.
pub fn cloud_code(code: &str) -> Option<&'static str> {
    let mapped = match code {
        "zh" => "zh",
        "en" => "en",
        "ja" => "jp",
        "ko" => "kor",
        "fr" => "fra",
        "de" => "de",
        "es" => "spa",
        "ru" => "ru",
        "ar" => "ara",
        "it" => "it",
        "pt" => "pt",
        "nl" => "nl",
        "pl" => "pl",
        "th" => "th",
        "cs" => "cs",
        "vi" => "vie",
        "yue" => "yue",
        "zh-Hant" => "cht",
        _ => return None,
    };
    Some(mapped)
}

/// Source side: unmapped codes let the API detect the language.
pub fn cloud_source_code(code: &str) -> &'static str {
    if code == "auto" {
        return "auto";
    }
    cloud_code(code).unwrap_or("auto")
}

/// Target side: unmapped codes fall back to Chinese.
pub fn cloud_target_code(code: &str) -> &'static str {
    cloud_code(code).unwrap_or("zh")
}

//! Browser Fingerprint Profiles
//!
//! Provider sites sit behind bot filters that reject bare HTTP clients.
//! Every request therefore goes out with a coherent set of browser headers
//! (User-Agent, Accept, Sec-CH-UA and Sec-Fetch hints matching one browser).

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};

/// Chrome releases with meaningful market share (major, full)
const CHROME_VERSIONS: &[(&str, &str)] = &[
    ("134", "134.0.0.0"),
    ("133", "133.0.0.0"),
    ("132", "132.0.0.0"),
    ("131", "131.0.0.0"),
];

const FIREFOX_VERSIONS: &[&str] = &["136.0", "135.0", "134.0"];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9,en-US;q=0.8",
    "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7",
    "uk-UA,uk;q=0.9,ru;q=0.8,en-US;q=0.7",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
}

impl Platform {
    fn random() -> Self {
        // Windows dominates desktop traffic; keep the distribution realistic
        let roll: f32 = rand::thread_rng().gen();
        if roll < 0.7 {
            Platform::Windows
        } else if roll < 0.9 {
            Platform::MacOS
        } else {
            Platform::Linux
        }
    }

    fn os_string(self) -> &'static str {
        match self {
            Platform::Windows => "Windows NT 10.0; Win64; x64",
            Platform::MacOS => "Macintosh; Intel Mac OS X 10_15_7",
            Platform::Linux => "X11; Linux x86_64",
        }
    }

    fn client_hint(self) -> &'static str {
        match self {
            Platform::Windows => "\"Windows\"",
            Platform::MacOS => "\"macOS\"",
            Platform::Linux => "\"Linux\"",
        }
    }
}

/// Header set impersonating one browser.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    /// Chromium client hints; empty for Firefox.
    pub sec_ch_ua: String,
    pub sec_ch_ua_platform: String,
}

impl BrowserProfile {
    /// Convert to default request headers.
    #[must_use]
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let mut put = |name: &'static str, value: &str| {
            if value.is_empty() {
                return;
            }
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        };

        put(USER_AGENT.as_str(), &self.user_agent);
        put(ACCEPT.as_str(), &self.accept);
        put(ACCEPT_LANGUAGE.as_str(), &self.accept_language);
        put("sec-ch-ua", &self.sec_ch_ua);
        if !self.sec_ch_ua.is_empty() {
            put("sec-ch-ua-mobile", "?0");
        }
        put("sec-ch-ua-platform", &self.sec_ch_ua_platform);
        put("sec-fetch-dest", "document");
        put("sec-fetch-mode", "navigate");
        put("sec-fetch-site", "none");
        put("upgrade-insecure-requests", "1");

        headers
    }
}

fn random_accept_language() -> String {
    (*ACCEPT_LANGUAGES
        .choose(&mut rand::thread_rng())
        .unwrap_or(&ACCEPT_LANGUAGES[0]))
    .to_string()
}

/// Chrome profile on a random desktop platform
#[must_use]
pub fn chrome_profile() -> BrowserProfile {
    let platform = Platform::random();
    let (major, full) = *CHROME_VERSIONS
        .choose(&mut rand::thread_rng())
        .unwrap_or(&CHROME_VERSIONS[0]);

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{full} Safari/537.36",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8".to_string(),
        accept_language: random_accept_language(),
        sec_ch_ua: format!(
            "\"Google Chrome\";v=\"{major}\", \"Chromium\";v=\"{major}\", \"Not_A Brand\";v=\"24\""
        ),
        sec_ch_ua_platform: platform.client_hint().to_string(),
    }
}

/// Firefox profile on a random desktop platform
#[must_use]
pub fn firefox_profile() -> BrowserProfile {
    let platform = Platform::random();
    let version = *FIREFOX_VERSIONS
        .choose(&mut rand::thread_rng())
        .unwrap_or(&FIREFOX_VERSIONS[0]);

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}; rv:{version}) Gecko/20100101 Firefox/{version}",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        accept_language: random_accept_language(),
        sec_ch_ua: String::new(),
        sec_ch_ua_platform: String::new(),
    }
}

/// Chrome three times out of four, Firefox otherwise
#[must_use]
pub fn random_profile() -> BrowserProfile {
    if rand::thread_rng().gen_bool(0.75) {
        chrome_profile()
    } else {
        firefox_profile()
    }
}

mod oauth;
mod redirect;

pub use oauth::Credentials;
pub use redirect::{HttpLinkResolver, LinkResolver, RedirectResolver, SHORT_URL_PATTERN};

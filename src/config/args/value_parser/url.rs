use url::Url;

const INVALID_SCHEME: &str = "URL scheme must be http:// or riak:// (TLS is not supported)";
const MISSING_HOST: &str = "URL must name a host";

pub fn check_scheme(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;

    if parsed.scheme() != "http" && parsed.scheme() != "riak" {
        return Err(INVALID_SCHEME.to_string());
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(MISSING_HOST.to_string());
    }

    Ok(url.to_string())
}

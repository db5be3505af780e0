use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    const fn empty_at(at: usize) -> Self {
        Self { start: at, end: at }
    }

    const fn is_empty(self) -> bool {
        self.start == self.end
    }

    /// Move a span which lay after `old_end` so that it lies after `new_end`
    const fn rebase(self, old_end: usize, new_end: usize) -> Self {
        Self {
            start: self.start - old_end + new_end,
            end: self.end - old_end + new_end,
        }
    }
}

/// A URL, split into its components without allocating each one
///
/// Parsing is lenient: it never fails on unusual input, it just
/// assigns everything it doesn't understand to the host. The layout is
///
/// ```text
/// [scheme "://"] [userinfo "@"] host [":" port] [path] ["?" query] ["#" fragment]
/// ```
///
/// and for any URL with a non-empty scheme, parsing then serialising
/// gives back the original text.
///
/// ```
/// use cotton_igd::Url;
///
/// let mut u = Url::parse("http://192.168.1.1:5000/rootDesc.xml").unwrap();
/// assert_eq!(u.host(), "192.168.1.1");
/// assert_eq!(u.port(), "5000");
/// u.replace_path("/ctl/IPConn");
/// assert_eq!(u.to_string(), "http://192.168.1.1:5000/ctl/IPConn");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Url {
    buffer: String,
    scheme: Span,
    userinfo: Span,
    host: Span,
    port: Span,
    path: Span,
    query: Span,
    fragment: Span,
}

impl Url {
    /// Split `text` into URL components
    ///
    /// Every component is optional, so any text is accepted; the empty
    /// string gives a URL whose components are all empty.
    pub fn parse(text: impl Into<String>) -> Option<Url> {
        let buffer = text.into();
        let s = buffer.as_str();
        let len = s.len();

        let (scheme, mut pos) = match s.find("://") {
            Some(i) => (Span::new(0, i), i + 3),
            None => (Span::empty_at(0), 0),
        };

        // userinfo only counts if its '@' comes before the path
        let rest = &s[pos..];
        let userinfo = match rest.find('@') {
            Some(i) if !rest[..i].contains('/') => {
                let span = Span::new(pos, pos + i);
                pos += i + 1;
                span
            }
            _ => Span::empty_at(pos),
        };

        let rest = &s[pos..];
        let host;
        let port;
        match rest.find(|c: char| c == ':' || c == '/') {
            Some(i) if rest.as_bytes()[i] == b':' => {
                host = Span::new(pos, pos + i);
                let after = pos + i + 1;
                match s[after..].find('/') {
                    Some(j) => {
                        port = Span::new(after, after + j);
                        pos = after + j;
                    }
                    None => {
                        port = Span::new(after, len);
                        pos = len;
                    }
                }
            }
            Some(i) => {
                host = Span::new(pos, pos + i);
                port = Span::empty_at(pos + i);
                pos += i;
            }
            None => {
                host = Span::new(pos, len);
                port = Span::empty_at(len);
                pos = len;
            }
        }

        let rest = &s[pos..];
        let (path, query, fragment) =
            match rest.find(|c: char| c == '?' || c == '#') {
                Some(i) if rest.as_bytes()[i] == b'?' => {
                    let path = Span::new(pos, pos + i);
                    let q = pos + i + 1;
                    match s[q..].find('#') {
                        Some(j) => (
                            path,
                            Span::new(q, q + j),
                            Span::new(q + j + 1, len),
                        ),
                        None => (path, Span::new(q, len), Span::empty_at(len)),
                    }
                }
                Some(i) => (
                    Span::new(pos, pos + i),
                    Span::empty_at(pos + i),
                    Span::new(pos + i + 1, len),
                ),
                None => (
                    Span::new(pos, len),
                    Span::empty_at(len),
                    Span::empty_at(len),
                ),
            };

        Some(Url {
            buffer,
            scheme,
            userinfo,
            host,
            port,
            path,
            query,
            fragment,
        })
    }

    fn get(&self, span: Span) -> &str {
        &self.buffer[span.start..span.end]
    }

    /// The scheme, e.g. "http", or "" if there was no "://"
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.get(self.scheme)
    }

    #[must_use]
    pub fn userinfo(&self) -> &str {
        self.get(self.userinfo)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        self.get(self.host)
    }

    /// The port, as text, or "" if none was given
    #[must_use]
    pub fn port(&self) -> &str {
        self.get(self.port)
    }

    /// The path, including its leading '/' (if any)
    #[must_use]
    pub fn path(&self) -> &str {
        self.get(self.path)
    }

    #[must_use]
    pub fn query(&self) -> &str {
        self.get(self.query)
    }

    #[must_use]
    pub fn fragment(&self) -> &str {
        self.get(self.fragment)
    }

    /// "host:port", or just "host" if there is no port
    #[must_use]
    pub fn host_and_port(&self) -> &str {
        if self.port.is_empty() {
            self.host()
        } else {
            &self.buffer[self.host.start..self.port.end]
        }
    }

    /// The port as a number, if there is one and it is valid
    #[must_use]
    pub fn numeric_port(&self) -> Option<u16> {
        self.port().parse().ok()
    }

    /// The endpoint to connect to, if the host is an IP address
    ///
    /// Without an explicit port, "https" means 443 and anything else 80.
    /// Host names are not resolved.
    #[must_use]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let ip = self.host().parse::<IpAddr>().ok()?;
        let port = if self.port.is_empty() {
            if self.scheme().eq_ignore_ascii_case("https") {
                443
            } else {
                80
            }
        } else {
            self.numeric_port()?
        };
        Some(SocketAddr::new(ip, port))
    }

    /// The path and query, as sent in an HTTP request line
    #[must_use]
    pub fn request_target(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { self.path() };
        if self.query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, self.query())
        }
    }

    /// Substitute a new path, keeping everything else
    ///
    /// ```
    /// use cotton_igd::Url;
    ///
    /// let mut u = Url::parse("http://example.org/foo?x=1#top").unwrap();
    /// u.replace_path("/bar/baz");
    /// assert_eq!(u.path(), "/bar/baz");
    /// assert_eq!(u.query(), "x=1");
    /// assert_eq!(u.fragment(), "top");
    /// ```
    pub fn replace_path(&mut self, path: &str) {
        let old = self.path;
        self.buffer.replace_range(old.start..old.end, path);
        let new_end = old.start + path.len();
        self.path = Span::new(old.start, new_end);
        self.query = self.query.rebase(old.end, new_end);
        self.fragment = self.fragment.rebase(old.end, new_end);
    }

    /// The text the URL was parsed from (with any path replacement)
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}://", self.scheme())?;
        }
        if !self.userinfo.is_empty() {
            write!(f, "{}@", self.userinfo())?;
        }
        f.write_str(self.host())?;
        if !self.port.is_empty() {
            write!(f, ":{}", self.port())?;
        }
        f.write_str(self.path())?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query())?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Url").field(&self.buffer).finish()
    }
}

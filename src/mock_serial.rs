//! We use this mocking module in unit tests to emulate a serial port.

/// Enough for a couple of full size frames.
const CAPACITY: usize = 1024;

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port
    write_buffer: heapless::Vec<u8, CAPACITY>,
    /// Buffer containing pre-configured response data to be read
    read_buffer: heapless::Vec<u8, CAPACITY>,
    /// Current position in the read buffer
    read_position: usize,
    /// Most bytes handed out by a single read
    chunk_size: usize,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
    /// Start over from the first byte once the read data is used up
    looping: bool,
    /// Written bytes come back to the reader, as on an RS-485 adapter
    echo: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MockSerialError {
    /// Simulated buffer overflow
    #[error("mock buffer overflow")]
    BufferOverflow,
    /// Simulated hardware failure
    #[error("mock port disconnected")]
    Disconnected,
    /// Would block - no data available
    #[error("no data available")]
    WouldBlock,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::Disconnected => embedded_io::ErrorKind::BrokenPipe,
            MockSerialError::WouldBlock => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::Disconnected);
        }
        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;
        if self.echo {
            if self.read_position >= self.read_buffer.len() {
                self.read_buffer.clear();
                self.read_position = 0;
            }
            self.read_buffer
                .extend_from_slice(buf)
                .map_err(|_| MockSerialError::BufferOverflow)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::Disconnected);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::Disconnected);
        }

        if self.looping && self.read_position >= self.read_buffer.len() {
            self.read_position = 0;
        }
        if self.read_position >= self.read_buffer.len() {
            return Err(MockSerialError::WouldBlock);
        }

        let available_bytes = self.read_buffer.len() - self.read_position;
        let bytes_to_read = buf.len().min(available_bytes).min(self.chunk_size);

        buf[..bytes_to_read].copy_from_slice(
            &self.read_buffer[self.read_position..self.read_position + bytes_to_read],
        );
        self.read_position += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            chunk_size: usize::MAX,
            should_error_on_write: false,
            should_error_on_read: false,
            looping: false,
            echo: false,
        }
    }

    /// Set the data that will be returned when read() is called
    pub fn set_read_data(&mut self, data: &[u8]) -> Result<(), MockSerialError> {
        self.read_buffer.clear();
        self.read_position = 0;
        self.read_buffer
            .extend_from_slice(data)
            .map_err(|_| MockSerialError::BufferOverflow)
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Hand out at most `size` bytes per read, as a slow line would
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size.max(1);
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }

    /// Replay the read data forever, the line never goes quiet
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Make every write readable again
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_write_data() {
        let mut mock = MockSerial::new();
        mock.write_all(&[0x01, 0x07]).unwrap();
        mock.write_all(&[0x1E]).unwrap();
        assert_eq!(mock.written_data(), &[0x01, 0x07, 0x1E]);
    }

    #[test]
    fn test_write_buffer_overflow() {
        let mut mock = MockSerial::new();
        let result = mock.write(&[0u8; CAPACITY + 1]);
        assert!(matches!(result, Err(MockSerialError::BufferOverflow)));
    }

    #[test]
    fn test_read_in_chunks() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"Hello World").unwrap();
        mock.set_chunk_size(5);

        let mut buffer = [0u8; 20];
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer[..5], b"Hello");
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(mock.read(&mut buffer).unwrap(), 1);
        assert!(matches!(
            mock.read(&mut buffer),
            Err(MockSerialError::WouldBlock)
        ));
    }

    #[test]
    fn test_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"data").unwrap();
        mock.set_read_error(true);
        mock.set_write_error(true);

        let mut buffer = [0u8; 10];
        assert!(matches!(
            mock.read(&mut buffer),
            Err(MockSerialError::Disconnected)
        ));
        assert!(mock.write(b"test").is_err());
        assert!(mock.flush().is_err());
        assert!(mock.written_data().is_empty());
    }

    #[test]
    fn test_looping_never_runs_dry() {
        let mut mock = MockSerial::new();
        mock.set_read_data(&[0xEE, 0xEF]).unwrap();
        mock.set_looping(true);

        let mut buffer = [0u8; 3];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], &[0xEE, 0xEF]);
    }

    #[test]
    fn test_echo() {
        let mut mock = MockSerial::new();
        mock.set_echo(true);
        mock.write_all(&[0x01, 0x07]).unwrap();

        let mut buffer = [0u8; 4];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], &[0x01, 0x07]);
        assert_eq!(mock.written_data(), &[0x01, 0x07]);

        // Consumed echoes make room for the next ones.
        for _ in 0..1000 {
            mock.write_all(&[0x1E]).unwrap();
            assert_eq!(mock.read(&mut buffer).unwrap(), 1);
            mock.write_buffer.clear();
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            MockSerialError::Disconnected.to_string(),
            "mock port disconnected"
        );
    }

    #[test]
    fn test_error_kinds() {
        // The transport takes `Other` for "nothing yet", real failures must not look like it.
        assert_eq!(MockSerialError::WouldBlock.kind(), embedded_io::ErrorKind::Other);
        assert_eq!(
            MockSerialError::Disconnected.kind(),
            embedded_io::ErrorKind::BrokenPipe
        );
    }
}
